use tabular_import::{
    RunStatus,
    error::{EXIT_CANCELLED, exit_code_for},
};

fn main() {
    match tabular_import::run() {
        Ok(RunStatus::Completed) => {}
        Ok(RunStatus::Cancelled) => std::process::exit(EXIT_CANCELLED),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}
