use log::{error, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

use sysgpio::{Direction, GpioError, PinController, PinValue, SysfsConfig, SysfsFs};

#[derive(Parser)]
#[command(
    name = "sysgpio",
    about = "Simple gpio access",
    version,
    arg_required_else_help = true
)]
struct Opts {
    /// Returns the input value of a sysfs DIO
    #[arg(short = 'p', long = "getin", value_name = "dio")]
    getin: Vec<u32>,

    /// Sets a sysfs DIO output value high
    #[arg(short = 'e', long = "setout", value_name = "dio")]
    setout: Vec<u32>,

    /// Sets a sysfs DIO output value low
    #[arg(short = 'l', long = "clrout", value_name = "dio")]
    clrout: Vec<u32>,

    /// Set sysfs DIO to an output
    #[arg(short = 'd', long = "ddrout", value_name = "dio")]
    ddrout: Vec<u32>,

    /// Set sysfs DIO to an input
    #[arg(short = 'r', long = "ddrin", value_name = "dio")]
    ddrin: Vec<u32>,

    /// Waits for an edge on a sysfs DIO configured as an input
    #[arg(short = 'w', long = "wait", value_name = "dio")]
    wait: Vec<u32>,

    /// JSON configuration file
    #[arg(long, env = "SYSGPIO_CONFIG", value_name = "file")]
    config: Option<PathBuf>,

    /// Overrides the sysfs GPIO root directory
    #[arg(long, value_name = "dir")]
    root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    GetIn(u32),
    SetOut(u32),
    ClrOut(u32),
    DdrOut(u32),
    DdrIn(u32),
    Wait(u32),
}

impl Action {
    fn pin(&self) -> u32 {
        match *self {
            Action::GetIn(pin)
            | Action::SetOut(pin)
            | Action::ClrOut(pin)
            | Action::DdrOut(pin)
            | Action::DdrIn(pin)
            | Action::Wait(pin) => pin,
        }
    }
}

// Actions run in command line order, whichever flag they came from.
fn ordered_actions(matches: &ArgMatches, opts: &Opts) -> Vec<Action> {
    let groups: [(&str, &[u32], fn(u32) -> Action); 6] = [
        ("getin", &opts.getin, Action::GetIn),
        ("setout", &opts.setout, Action::SetOut),
        ("clrout", &opts.clrout, Action::ClrOut),
        ("ddrout", &opts.ddrout, Action::DdrOut),
        ("ddrin", &opts.ddrin, Action::DdrIn),
        ("wait", &opts.wait, Action::Wait),
    ];

    let mut indexed: Vec<(usize, Action)> = Vec::new();
    for (id, pins, make) in groups {
        if let Some(indices) = matches.indices_of(id) {
            indexed.extend(indices.zip(pins.iter().map(|&pin| make(pin))));
        }
    }
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, action)| action).collect()
}

fn run(controller: &PinController<SysfsFs>, action: Action) -> Result<(), GpioError> {
    let pin = action.pin();
    if let Err(e) = controller.export(pin) {
        // usually already exported; the per-pin operation decides
        warn!("export of gpio{pin} failed: {e}");
    }

    let result = match action {
        Action::GetIn(pin) => controller.read_value(pin).map(|value| {
            println!("gpio{pin}={value}");
        }),
        Action::SetOut(pin) => controller.write_value(pin, PinValue::High),
        Action::ClrOut(pin) => controller.write_value(pin, PinValue::Low),
        Action::DdrOut(pin) => controller.set_direction(pin, Direction::Out),
        Action::DdrIn(pin) => controller.set_direction(pin, Direction::In),
        Action::Wait(pin) => controller
            .set_direction(pin, Direction::In)
            .and_then(|_| controller.set_edge(pin, true, true))
            .and_then(|_| controller.wait_for_edge(pin))
            .map(|_| println!("gpio{pin} edge")),
    };

    controller.unexport(pin);
    result
}

fn load_config(opts: &Opts) -> Result<SysfsConfig, GpioError> {
    let mut config = match &opts.config {
        Some(path) => SysfsConfig::load_from_file(path)?,
        None => SysfsConfig::default(),
    };
    if let Some(root) = &opts.root {
        config.root = root.clone();
    }
    Ok(config)
}

fn main() -> ExitCode {
    env_logger::init();

    let matches = Opts::command().get_matches();
    let opts = match Opts::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(e) => e.exit(),
    };

    let config = match load_config(&opts) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let actions = ordered_actions(&matches, &opts);
    if actions.is_empty() {
        let _ = Opts::command().print_help();
        return ExitCode::FAILURE;
    }

    let controller = PinController::new(Arc::new(config), Arc::new(SysfsFs::new()));
    let mut ok = true;
    for action in actions {
        if let Err(e) = run(&controller, action) {
            error!("{action:?} failed: {e}");
            ok = false;
        }
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
