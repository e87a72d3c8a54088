mod autopilot;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    autopilot::telemetry::init_tracing();
    let args: Vec<String> = std::env::args().collect();
    let config = autopilot::AutopilotConfig::from_args(&args)?;
    autopilot::run(config)
}
