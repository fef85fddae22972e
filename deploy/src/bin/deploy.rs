use deploy::{module::DylibModule, Error, Harness, HarnessConfig, DEFAULT_ARTIFACT};
use log::{error, info};
use std::{io, process::ExitCode};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Error> {
    let module = DylibModule::load(DEFAULT_ARTIFACT)?;
    let config = HarnessConfig::default();
    info!("verify dynamic loading from {DEFAULT_ARTIFACT}");

    let harness = Harness::new(&module, config)?;
    harness.run(&mut io::stdout().lock())?;
    info!("finish verification");
    Ok(())
}
