use deploy::{
    dlpack::DeviceType,
    module::DylibModule,
    profiling::{MetricCollector, Profiler},
    Error, Harness, HarnessConfig, DEFAULT_ARTIFACT,
};
use log::{error, info};
use std::{
    io::{self, Write},
    process::ExitCode,
};

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

#[cfg(unix)]
fn collectors() -> Result<Vec<Box<dyn MetricCollector>>, Error> {
    use deploy::profiling::RusageCollector;

    const CPU: &[&str] = &[
        "rusage::USER-TIME",
        "rusage::SYSTEM-TIME",
        "rusage::MINOR-FAULTS",
        "rusage::MAJOR-FAULTS",
        "rusage::VOLUNTARY-SWITCHES",
        "rusage::INVOLUNTARY-SWITCHES",
    ];
    const CUDA: &[&str] = &["cuda:::event:elapsed_cycles_sm:device=0"];

    let collector = RusageCollector::new([(DeviceType::Cpu, CPU), (DeviceType::Cuda, CUDA)])?;
    Ok(vec![Box::new(collector)])
}

#[cfg(not(unix))]
fn collectors() -> Result<Vec<Box<dyn MetricCollector>>, Error> {
    log::warn!("no metric collector on this platform");
    Ok(vec![])
}

fn run() -> Result<(), Error> {
    let module = DylibModule::load(DEFAULT_ARTIFACT)?;
    let config = HarnessConfig::default();
    info!("verify dynamic loading from {DEFAULT_ARTIFACT}");

    let harness = Harness::new(&module, config)?;
    let mut out = io::stdout().lock();

    let collectors = collectors()?;
    writeln!(out, "collector created")?;
    let mut profiler = Profiler::new([harness.config().device], collectors)?;
    writeln!(out, "Profiler created")?;

    let (_, report) = harness.run_profiled(&mut profiler, &mut out)?;
    writeln!(out)?;
    write!(out, "{report}")?;
    info!("finish verification");
    Ok(())
}
