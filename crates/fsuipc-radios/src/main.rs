use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use fsuipc_link::{FieldWidth, Simulator, Transport, testing::ScriptedSim};
use fsuipc_radios::{
    PanelError, RadioPanel, RadioReadout,
    offsets::{RADIO_SWITCH, WIDE},
};
use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static HELP_STR_SIMULATOR: &str = "
    Require a specific simulator kind and fail the connection if a \
                                   different one answers. Accepts the \
                                   well-known short names (fs2k4, fsx, esp, \
                                   p3d, ...). Example value: \"any\"
";

#[derive(clap::Parser)]
#[command(
    name = "fsuipc-radios",
    version,
    about = "fsuipc-radios",
    long_about = "A COM radio monitor that talks to FSUIPC-compatible \
                  simulators over their shared-memory channel, either \
                  against a live simulator or against the built-in \
                  scripted one"
)]
enum Args {
    /// Read the COM stack once and print it
    Status {
        #[arg(
            long,
            short,
            value_name = "SIMULATOR",
            help = HELP_STR_SIMULATOR,
            default_value = "any"
        )]
        simulator: Simulator,

        #[arg(
            long,
            help = "Run against the built-in scripted simulator instead of \
                    a live one"
        )]
        demo: bool,
    },
    /// Poll the COM stack until interrupted, printing changes
    Watch {
        #[arg(
            long,
            short,
            value_name = "SIMULATOR",
            help = HELP_STR_SIMULATOR,
            default_value = "any"
        )]
        simulator: Simulator,

        #[arg(
            long,
            short = 'i',
            value_name = "MILLIS",
            help = "Pause between polls. Example value: 1000",
            default_value = "1000"
        )]
        interval: u64,

        #[arg(
            long,
            help = "Run against the built-in scripted simulator instead of \
                    a live one"
        )]
        demo: bool,
    },
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    init_tracing();

    match Args::parse() {
        Args::Status { simulator, demo } => {
            if demo {
                run_status(demo_panel(), simulator)
            } else {
                run_live_status(simulator)
            }
        }
        Args::Watch {
            simulator,
            interval,
            demo,
        } => {
            if demo {
                run_watch(demo_panel(), simulator, interval)
            } else {
                run_live_watch(simulator, interval)
            }
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

#[cfg(windows)]
fn run_live_status(simulator: Simulator) -> eyre::Result<()> {
    run_status(
        RadioPanel::new(fsuipc_link::FsuipcLink::new()),
        simulator,
    )
}

#[cfg(windows)]
fn run_live_watch(simulator: Simulator, interval: u64) -> eyre::Result<()> {
    run_watch(
        RadioPanel::new(fsuipc_link::FsuipcLink::new()),
        simulator,
        interval,
    )
}

#[cfg(not(windows))]
fn run_live_status(_simulator: Simulator) -> eyre::Result<()> {
    eyre::bail!("a live simulator link needs Windows; use --demo elsewhere")
}

#[cfg(not(windows))]
fn run_live_watch(_simulator: Simulator, _interval: u64) -> eyre::Result<()> {
    eyre::bail!("a live simulator link needs Windows; use --demo elsewhere")
}

/// A scripted peer with a plausible wide COM stack, for demos and for
/// exercising the binary anywhere.
fn demo_panel() -> RadioPanel<ScriptedSim> {
    let mut sim = ScriptedSim::live(Simulator::Fs2k4);
    sim.set_u32(WIDE.com1_active, 124_850_000);
    sim.set_u32(WIDE.com1_standby, 121_500_000);
    sim.set_u32(WIDE.com2_active, 118_700_000);
    sim.set_u32(WIDE.com2_standby, 135_975_000);
    sim.set_u8(RADIO_SWITCH, 0b0000_0101);

    let mut slot = Some(sim);
    RadioPanel::new(fsuipc_link::FsuipcLink::with_connector(move || {
        Ok(slot.take().expect("the demo connector only connects once"))
    }))
}

fn connect<T: Transport>(
    panel: &mut RadioPanel<T>,
    simulator: Simulator,
) -> eyre::Result<()> {
    panel.open(simulator)?;

    let link = panel.link();
    if link.field_width() == FieldWidth::Unknown {
        // the simulator may still be loading; one more probe is cheap
        link.refresh_field_width()?;
    }

    if let Some(version) = link.version() {
        let name = Simulator::from_repr(version.simulator)
            .unwrap_or(Simulator::Any);
        info!(
            simulator = %name,
            fsuipc = format_args!("{:#x}", version.fsuipc),
            "connected"
        );
    }
    Ok(())
}

fn run_status<T: Transport>(
    mut panel: RadioPanel<T>,
    simulator: Simulator,
) -> eyre::Result<()> {
    connect(&mut panel, simulator)?;
    let readout = panel.refresh()?;
    print_readout(&readout);
    panel.close()?;
    Ok(())
}

fn run_watch<T: Transport>(
    mut panel: RadioPanel<T>,
    simulator: Simulator,
    interval: u64,
) -> eyre::Result<()> {
    connect(&mut panel, simulator)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))?;
    }

    let mut shown: Option<RadioReadout> = None;
    while !stop.load(Ordering::SeqCst) {
        match panel.refresh() {
            Ok(readout) => {
                if shown != Some(readout) {
                    print_readout(&readout);
                    shown = Some(readout);
                }
            }
            Err(PanelError::PeerGone) => {
                info!("simulator went away, stopping");
                break;
            }
            Err(err) => return Err(err.into()),
        }
        std::thread::sleep(Duration::from_millis(interval));
    }

    if panel.is_connected() {
        panel.close()?;
    }
    Ok(())
}

fn print_readout(readout: &RadioReadout) {
    println!(
        "COM1 {} / {}   COM2 {} / {}   switches {:#04x}",
        format_mhz(readout.com1_active),
        format_mhz(readout.com1_standby),
        format_mhz(readout.com2_active),
        format_mhz(readout.com2_standby),
        readout.switches,
    );
}

fn format_mhz(hz: u32) -> String {
    format!("{}.{:03}", hz / 1_000_000, hz % 1_000_000 / 1000)
}
