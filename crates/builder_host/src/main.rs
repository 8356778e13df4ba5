use std::process::ExitCode;

mod app;

fn main() -> ExitCode {
    let wiring = match app::bootstrap::build_host() {
        Ok(wiring) => wiring,
        Err(err) => {
            tracing::error!(error = %err, "startup_failed");
            return ExitCode::FAILURE;
        }
    };
    app::loop_runner::run(wiring)
}
