//! gpu-debug: inspect GPU devices and exercise the checked runtime layer.

use clap::Parser;
use tracing::{info, warn};

use gpu_debug::config::{Cli, Command, Config, SelftestStep};
use gpu_debug::runtime::mock::{MockOp, MockRuntime};
use gpu_debug::{CheckResult, DebugContext, DevicePropReporter, Runtime, RuntimeError};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "gpu_debug=trace"
    } else {
        "gpu_debug=warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("gpu-debug v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;
    info!(
        sync_mode = config.debug.sync_mode,
        policy = ?config.debug.policy,
        "Configuration loaded"
    );

    #[cfg(feature = "cuda")]
    if !cli.mock {
        if let Command::Selftest {
            fail_at: Some(_), ..
        } = &cli.command
        {
            warn!("--fail-at only applies to the simulated runtime; ignoring");
        }
        return run(gpu_debug::CudaRuntime::new(), &cli, &config);
    }

    if !cli.mock {
        info!("CUDA not enabled, running with the simulated runtime");
    }
    let runtime = MockRuntime::new();
    if let Command::Selftest {
        fail_at: Some(step),
        ..
    } = &cli.command
    {
        warn!(?step, "Injecting runtime failure");
        runtime.fail_next(mock_op(*step), RuntimeError::INVALID_VALUE);
    }
    run(runtime, &cli, &config)
}

fn mock_op(step: SelftestStep) -> MockOp {
    match step {
        SelftestStep::StreamCreate => MockOp::StreamCreate,
        SelftestStep::Malloc => MockOp::Malloc,
        SelftestStep::Memset => MockOp::Memset,
        SelftestStep::CopyToDevice => MockOp::CopyToDevice,
        SelftestStep::CopyToHost => MockOp::CopyToHost,
        SelftestStep::Free => MockOp::Free,
        SelftestStep::StreamDestroy => MockOp::StreamDestroy,
    }
}

fn run<R: Runtime>(runtime: R, cli: &Cli, config: &Config) -> anyhow::Result<()> {
    match &cli.command {
        Command::Devices { json } => {
            let reporter = DevicePropReporter::new(runtime, !json)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(reporter.devices())?);
            }
            if reporter.is_empty() {
                warn!("No GPU devices found");
            }
        }

        Command::Select { index } => {
            let reporter = DevicePropReporter::new(runtime, false)?;
            reporter.set(*index)?;
            let props = reporter
                .devices()
                .get(*index)
                .ok_or_else(|| anyhow::anyhow!("device {index} not enumerated"))?;
            println!("Active device {index}: {}", props.name);
        }

        Command::Selftest {
            sync,
            policy,
            bytes,
            ..
        } => {
            let reporter = DevicePropReporter::new(runtime, config.device.print_on_start)?;
            if let Some(index) = config.device.index {
                reporter.set(index)?;
            }
            let runtime = reporter.into_runtime();

            let mut ctx = DebugContext::from_config(runtime, &config.debug);
            if *sync {
                ctx.set_sync_mode(true);
            }
            if let Some(policy) = policy {
                ctx.set_policy((*policy).into());
            }

            selftest(&mut ctx, *bytes)?;
            println!("selftest passed ({bytes} bytes)");
        }
    }
    Ok(())
}

/// Stream, allocate, fill, copy up and back, verify, release.
fn selftest<R: Runtime>(ctx: &mut DebugContext<R>, bytes: usize) -> CheckResult<()> {
    let stream = ctx.stream_create()?;
    let dev = ctx.malloc(bytes)?;
    ctx.memset_async(dev, 0, bytes, stream)?;

    let pattern: Vec<u8> = (0..bytes).map(|i| (i % 251) as u8).collect();
    ctx.memcpy_to_device_async(dev, &pattern, stream)?;
    ctx.stream_synchronize(stream)?;

    let mut back = vec![0u8; bytes];
    ctx.memcpy_to_host(&mut back, dev)?;
    if back != pattern {
        return Err(ctx.fatal("read-back does not match the uploaded pattern"));
    }

    ctx.free(dev)?;
    ctx.stream_destroy(stream)?;
    ctx.check_last_error()
}
