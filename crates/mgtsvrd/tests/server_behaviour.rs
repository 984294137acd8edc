//! End-to-end behaviour of a running server over real sockets.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use mgtsvr_auth::{Auth, JsonFileStore, UserRecord, UserStore, hash_password};
use mgtsvr_config::Config;
use mgtsvrd::{FortuneService, Server, ServerDeps, StructuredHealthReporter};

const READ_TIMEOUT: Duration = Duration::from_secs(3);

struct Fixture {
    dir: TempDir,
    auth_db: Utf8PathBuf,
}

impl Fixture {
    fn config(&self, policy: u8) -> Config {
        Config {
            tcp_port: 0,
            auth_policy: policy,
            worker_threads: 3,
            auth_db: self.auth_db.clone(),
            disconnect_delay_ms: 50,
            ..Config::default()
        }
    }

    fn start(&self, config: &Config) -> Server {
        Server::start(
            config,
            ServerDeps {
                store: Arc::new(JsonFileStore),
                extension: Arc::new(FortuneService::builtin()),
                reporter: Arc::new(StructuredHealthReporter::new()),
            },
        )
        .expect("server starts")
    }
}

#[fixture]
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("temp dir");
    let auth_db = Utf8PathBuf::from_path_buf(dir.path().join("auth_db.json")).expect("utf8 path");
    let mut root = UserRecord::new("root", hash_password("toor"));
    root.privilege = -2;
    let records = vec![UserRecord::new("alice", hash_password("wonder")), root];
    JsonFileStore
        .save(auth_db.as_std_path(), &records)
        .expect("seed database");
    Fixture { dir, auth_db }
}

struct Client<S: Read + Write> {
    writer: S,
    reader: BufReader<S>,
}

impl<S: Read + Write> Client<S> {
    fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read line");
        assert!(line.ends_with('\n'), "unterminated line {line:?}");
        line.trim_end_matches('\n').to_owned()
    }

    fn send(&mut self, text: &str) {
        self.writer
            .write_all(format!("{text}\n").as_bytes())
            .expect("write line");
    }

    /// Reads lines until one satisfies `predicate`, returning all of them.
    fn until(&mut self, predicate: impl Fn(&str) -> bool) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.line();
            let done = predicate(&line);
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    fn expect_closed(&mut self) {
        let started = Instant::now();
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest).expect("server closes");
        assert!(started.elapsed() < READ_TIMEOUT);
    }

    fn challenge_login(&mut self, username: &str, password: &str) -> String {
        assert_eq!(self.line(), "username: ");
        self.send(username);
        let prompt = self.line();
        let session = prompt
            .strip_prefix("session: ")
            .unwrap_or_else(|| panic!("expected session prompt, got {prompt:?}"));
        assert_eq!(session.len(), 64);
        let response = Auth::client()
            .challenge_response(session, password)
            .expect("client role");
        self.send(&response);
        self.line()
    }
}

fn tcp_client(server: &Server) -> Client<TcpStream> {
    let stream = TcpStream::connect(server.tcp_addr().expect("tcp enabled")).expect("connect");
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .expect("read timeout");
    let reader = BufReader::new(stream.try_clone().expect("clone stream"));
    Client {
        writer: stream,
        reader,
    }
}

fn load_records(path: &Path) -> Vec<UserRecord> {
    JsonFileStore.load(path).expect("database readable")
}

#[rstest]
fn challenge_login_and_whoami(fixture: Fixture) {
    let server = fixture.start(&fixture.config(3));
    let mut client = tcp_client(&server);

    assert_eq!(client.challenge_login("alice", "wonder"), "[logged on as alice]");
    client.send("/WhoAmI");
    let lines = client.until(|line| line.starts_with("account created"));
    assert!(lines.contains(&"user alice, privilege 0".to_owned()), "{lines:?}");

    client.send("fortune");
    assert!(!client.line().is_empty());
    client.send("fortunes");
    client.until(|line| line.ends_with("fortunes available]"));

    client.send("/exit");
    client.until(|line| line == "goodbye.");
    client.expect_closed();

    server.shutdown().expect("clean shutdown");
    let alice = load_records(fixture.auth_db.as_std_path())
        .into_iter()
        .find(|record| record.username == "alice")
        .expect("alice persisted");
    assert!(!alice.last_login.is_never());
    assert!(!alice.last_seen.is_never());
}

#[rstest]
fn wrong_password_is_refused_and_disconnected(fixture: Fixture) {
    let server = fixture.start(&fixture.config(3));
    let mut client = tcp_client(&server);

    assert_eq!(
        client.challenge_login("alice", "not-wonder"),
        "[unable to authenticate]"
    );
    assert_eq!(client.line(), "disconnecting...");
    client.expect_closed();
    assert_eq!(server.auth().is_logged_in("alice"), Some(false));
    server.shutdown().expect("clean shutdown");
}

#[rstest]
fn privileges_gate_down_and_down_stops_the_server(fixture: Fixture) {
    let server = fixture.start(&fixture.config(3));
    let trigger = server.trigger();
    let mut alice = tcp_client(&server);
    let mut root = tcp_client(&server);
    assert_eq!(alice.challenge_login("alice", "wonder"), "[logged on as alice]");
    assert_eq!(root.challenge_login("root", "toor"), "[logged on as root]");

    alice.send("/down");
    assert_eq!(
        alice.line(),
        "[you do not have privileges to execute the command DOWN]"
    );
    alice.send("/nonsense");
    assert_eq!(alice.line(), "[internal command NONSENSE not recognized]");

    root.send("/broadcast maintenance soon");
    assert_eq!(alice.line(), "[broadcast message from user: root]");
    assert_eq!(alice.line(), "maintenance soon");
    assert_eq!(root.line(), "[broadcast delivered to 1 connection(s)]");

    root.send("/down");
    assert_eq!(root.line(), "[shutdown requested]");
    assert!(trigger.wait_timeout(READ_TIMEOUT).is_some());

    let summary = server.shutdown().expect("clean shutdown");
    let mut logged_out = summary.logged_out;
    logged_out.sort();
    assert_eq!(logged_out, vec!["alice", "root"]);
    assert_eq!(alice.line(), "[server is shutting down]");
    alice.expect_closed();
}

#[rstest]
fn duplicate_login_is_refused(fixture: Fixture) {
    let server = fixture.start(&fixture.config(3));
    let mut first = tcp_client(&server);
    let mut second = tcp_client(&server);
    assert_eq!(first.challenge_login("alice", "wonder"), "[logged on as alice]");
    assert_eq!(
        second.challenge_login("alice", "wonder"),
        "[user alice is already logged on]"
    );
    assert_eq!(second.line(), "disconnecting...");
    second.expect_closed();
    server.shutdown().expect("clean shutdown");
}

#[rstest]
fn overlong_line_is_rejected(fixture: Fixture) {
    let config = Config {
        max_line_length: 128,
        ..fixture.config(0)
    };
    let server = fixture.start(&config);
    let mut client = tcp_client(&server);
    client.send(&"z".repeat(1024));
    assert_eq!(client.line(), "[line too long]");
    assert_eq!(client.line(), "disconnecting...");
    client.expect_closed();
    server.shutdown().expect("clean shutdown");
}

#[rstest]
fn open_policy_with_prompt_and_banner(fixture: Fixture) {
    let banner = fixture.dir.path().join("banner.txt");
    std::fs::write(&banner, "welcome to\nthe fortune server\n").expect("write banner");
    let config = Config {
        banner: true,
        banner_file: Some(Utf8PathBuf::from_path_buf(banner).expect("utf8 path")),
        prompt: true,
        ..fixture.config(1)
    };
    let server = fixture.start(&config);
    let mut client = tcp_client(&server);
    assert_eq!(client.line(), "welcome to");
    assert_eq!(client.line(), "the fortune server");
    assert_eq!(client.line(), "> ");

    client.send("/whoami");
    let lines = client.until(|line| line == "> ");
    assert!(lines.contains(&"not logged on".to_owned()), "{lines:?}");
    server.shutdown().expect("clean shutdown");
}

#[rstest]
fn missing_database_starts_empty_and_is_created(fixture: Fixture) {
    let auth_db =
        Utf8PathBuf::from_path_buf(fixture.dir.path().join("fresh.json")).expect("utf8 path");
    let config = Config {
        auth_db: auth_db.clone(),
        ..fixture.config(3)
    };
    let server = fixture.start(&config);
    assert_eq!(server.auth().user_count(), 0);
    let mut client = tcp_client(&server);
    assert_eq!(client.line(), "username: ");
    client.send("alice");
    assert_eq!(client.line(), "[unable to authenticate]");
    server.shutdown().expect("clean shutdown");
    assert!(load_records(auth_db.as_std_path()).is_empty());
}

#[cfg(unix)]
#[rstest]
fn plaintext_login_over_unix_socket(fixture: Fixture) {
    use std::os::unix::net::UnixStream;

    let socket =
        Utf8PathBuf::from_path_buf(fixture.dir.path().join("run").join("mgtsvr.sock"))
            .expect("utf8 path");
    let config = Config {
        tcp_enabled: false,
        unix_enabled: true,
        unix_socket_path: socket.clone(),
        ..fixture.config(2)
    };
    socket
        .parent()
        .map(std::fs::create_dir_all)
        .transpose()
        .expect("socket directory");
    let server = fixture.start(&config);
    assert!(server.tcp_addr().is_none());

    let stream = UnixStream::connect(socket.as_std_path()).expect("connect unix");
    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .expect("read timeout");
    let mut client = Client {
        reader: BufReader::new(stream.try_clone().expect("clone stream")),
        writer: stream,
    };
    assert_eq!(client.line(), "username: ");
    client.send("alice");
    assert_eq!(client.line(), "password: ");
    client.send("wonder");
    assert_eq!(client.line(), "[logged on as alice]");
    client.send("/users");
    let lines = client.until(|line| line.ends_with("users."));
    assert_eq!(lines.last().map(String::as_str), Some("2 users."));

    server.shutdown().expect("clean shutdown");
    assert!(!socket.exists(), "socket file removed");
}
