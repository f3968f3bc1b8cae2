use confgit::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());
    let _telemetry_guard = init_tracing(&cli);

    if let Err(e) = cli::run(cli) {
        tracing::error!(effect = e.effect().as_str(), "error: {e}");
        std::process::exit(1);
    }
}

fn init_tracing(cli: &cli::Cli) -> telemetry::TelemetryGuard {
    // A broken config still gets a usable error on stdout; the load error
    // itself resurfaces with full context in cli::run.
    let logging = config::load(cli.config.as_deref())
        .map(|cfg| cfg.logging)
        .unwrap_or_default();
    let verbosity = if cli.quiet {
        0
    } else {
        cli.verbose.saturating_add(1)
    };
    telemetry::init(telemetry::TelemetryConfig::new(verbosity, logging))
}
