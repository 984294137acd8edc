use std::process::ExitCode;

fn main() -> ExitCode {
    match mgtsvrd::run_server() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("fortune-server: {error}");
            ExitCode::FAILURE
        }
    }
}
