//! Execution of each administration subcommand.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use mgtsvr_auth::{
    Auth, PersistError, UserRecord, UserStore, derive_logon_password, generate_challenge,
    hash_password,
};

use crate::cli::{AdminCommand, Secret};
use crate::errors::AdminError;

/// Accounts written by `create`: name, password and privilege.
const DEFAULT_ACCOUNTS: &[(&str, &str, i32)] = &[
    ("user", "user", 0),
    ("admin", "admin", -1),
    ("operator", "operator", -2),
    ("chump", "chump", 1),
];

const LIST_HEADER: &str =
    "username        priv last seen                        creation date";

/// A user database loaded into a server-role [`Auth`].
struct Database<'a> {
    store: &'a dyn UserStore,
    path: Utf8PathBuf,
    auth: Auth,
}

impl<'a> Database<'a> {
    fn open(store: &'a dyn UserStore, path: &Utf8Path) -> Result<Self, AdminError> {
        let auth = Auth::server();
        auth.load_users(store, path.as_std_path())
            .map_err(|source| AdminError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            store,
            path: path.to_path_buf(),
            auth,
        })
    }

    /// Starts an empty database, refusing to clobber an existing one.
    fn create(store: &'a dyn UserStore, path: &Utf8Path) -> Result<Self, AdminError> {
        let auth = Auth::server();
        match auth.load_users(store, path.as_std_path()) {
            Err(PersistError::NotFound { .. }) => Ok(Self {
                store,
                path: path.to_path_buf(),
                auth,
            }),
            Ok(_) => Err(AdminError::AlreadyExists {
                path: path.to_path_buf(),
            }),
            Err(source) => Err(AdminError::Open {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn require(&self, username: &str) -> Result<(), AdminError> {
        self.auth
            .privilege(username)
            .map(|_| ())
            .ok_or_else(|| AdminError::UnknownUser {
                username: username.to_owned(),
            })
    }

    fn save(&self, out: &mut impl Write, verb: &str) -> Result<(), AdminError> {
        self.auth
            .save_users(self.store, self.path.as_std_path())
            .map_err(|source| AdminError::Save {
                path: self.path.clone(),
                source,
            })?;
        writeln!(out, "{verb}: wrote auth DB: {}", self.path)?;
        Ok(())
    }
}

impl Secret {
    fn into_hash(self) -> String {
        let password = self.password;
        self.hash
            .unwrap_or_else(|| hash_password(password.as_deref().unwrap_or_default()))
    }
}

/// Runs `command` against `store`, writing results to `out`.
pub(crate) fn execute(
    command: AdminCommand,
    store: &dyn UserStore,
    out: &mut impl Write,
) -> Result<(), AdminError> {
    match command {
        AdminCommand::Create { db } => create(store, &db, out),
        AdminCommand::List { db } => list(&Database::open(store, &db)?, out),
        AdminCommand::Add {
            db,
            user,
            secret,
            privilege,
        } => {
            let database = Database::open(store, &db)?;
            if !database.auth.add_user(&user, &secret.into_hash()) {
                return Err(AdminError::DuplicateUser { username: user });
            }
            if !database.auth.set_privilege(&user, privilege) {
                return Err(AdminError::UnknownUser { username: user });
            }
            writeln!(out, "add: added user {user} with privilege {privilege}")?;
            database.save(out, "add")
        }
        AdminCommand::Delete { db, user } => {
            let database = Database::open(store, &db)?;
            if !database.auth.delete_user(&user) {
                return Err(AdminError::UnknownUser { username: user });
            }
            writeln!(out, "delete: removed user {user}")?;
            database.save(out, "delete")
        }
        AdminCommand::Passwd { db, user, secret } => {
            let database = Database::open(store, &db)?;
            if !database.auth.reset_password(&user, &secret.into_hash()) {
                return Err(AdminError::UnknownUser { username: user });
            }
            writeln!(out, "passwd: changed password for {user}")?;
            database.save(out, "passwd")
        }
        AdminCommand::Privilege { db, user, level } => {
            let database = Database::open(store, &db)?;
            if !database.auth.set_privilege(&user, level) {
                return Err(AdminError::UnknownUser { username: user });
            }
            writeln!(out, "privilege: {user} now has privilege {level}")?;
            database.save(out, "privilege")
        }
        AdminCommand::Loginout { db, user } => {
            let database = Database::open(store, &db)?;
            database.require(&user)?;
            if !(database.auth.force_authenticate(&user) && database.auth.logout(&user)) {
                return Err(AdminError::LoginOut { username: user });
            }
            database.save(out, "loginout")
        }
        AdminCommand::Pwgen { password } => {
            writeln!(out, "{}", hash_password(&password))?;
            Ok(())
        }
        AdminCommand::Crgen { session, password } => {
            writeln!(out, "{}", generate_challenge(&session, &hash_password(&password)))?;
            Ok(())
        }
        AdminCommand::Cpackgen { db, user } => {
            let database = Database::open(store, &db)?;
            let pack = database
                .auth
                .challenge(&user)
                .ok_or(AdminError::UnknownUser { username: user })?;
            writeln!(out, "session key      : {}", pack.session)?;
            writeln!(out, "expected response: {}", pack.expected_response)?;
            Ok(())
        }
        AdminCommand::Logongen { passphrase, pin } => {
            let password = derive_logon_password(&passphrase, pin)?;
            writeln!(out, "generated password: {password}")?;
            Ok(())
        }
    }
}

fn create(store: &dyn UserStore, path: &Utf8Path, out: &mut impl Write) -> Result<(), AdminError> {
    let database = Database::create(store, path)?;
    for (username, password, privilege) in DEFAULT_ACCOUNTS {
        let added = database.auth.add_user_plaintext(username, password)
            && database.auth.set_privilege(username, *privilege);
        writeln!(out, "add default user {username}: {added}")?;
    }
    database.save(out, "create")
}

fn list(database: &Database<'_>, out: &mut impl Write) -> Result<(), AdminError> {
    let records = database.auth.snapshot();
    writeln!(out, "{LIST_HEADER}")?;
    for record in &records {
        writeln!(out, "{}", list_row(record))?;
    }
    writeln!(out, "{} user records.", records.len())?;
    Ok(())
}

fn list_row(record: &UserRecord) -> String {
    format!(
        "{:<16.16}{:<5.5}{:<33}{}",
        record.username,
        record.privilege.to_string(),
        record.last_seen.to_string(),
        record.creation
    )
}

#[cfg(test)]
mod tests {
    use mgtsvr_auth::{MemoryStore, Timestamp};
    use rstest::rstest;

    use super::*;

    fn run(store: &MemoryStore, command: AdminCommand) -> Result<String, AdminError> {
        let mut out = Vec::new();
        execute(command, store, &mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    #[rstest]
    fn rows_pad_and_truncate_columns() {
        let mut record = UserRecord::new("a-very-long-account-name", "hash");
        record.privilege = -2;
        record.creation = Timestamp::from_millis(1_000);
        let row = list_row(&record);
        assert!(row.starts_with("a-very-long-acco-2   never"), "{row}");
        assert!(row.ends_with("1970-01-01T00:00:01Z"), "{row}");
        assert_eq!(row.find("1970"), Some(16 + 5 + 33));
    }

    #[rstest]
    fn create_refuses_an_existing_database() {
        let store = MemoryStore::new();
        let db = Utf8PathBuf::from("users.json");
        run(&store, AdminCommand::Create { db: db.clone() }).expect("first create");
        assert!(store.contains(db.as_std_path()));
        let error = run(&store, AdminCommand::Create { db }).expect_err("second create");
        assert!(matches!(error, AdminError::AlreadyExists { .. }));
    }

    #[rstest]
    fn hash_takes_precedence_over_derivation() {
        let secret = Secret {
            password: None,
            hash: Some("stored".to_owned()),
        };
        assert_eq!(secret.into_hash(), "stored");
        let secret = Secret {
            password: Some("pw".to_owned()),
            hash: None,
        };
        assert_eq!(secret.into_hash(), hash_password("pw"));
    }

    #[rstest]
    fn missing_database_is_an_open_error() {
        let store = MemoryStore::new();
        let error = run(
            &store,
            AdminCommand::List {
                db: Utf8PathBuf::from("absent.json"),
            },
        )
        .expect_err("list fails");
        assert!(matches!(
            error,
            AdminError::Open {
                source: PersistError::NotFound { .. },
                ..
            }
        ));
    }
}
