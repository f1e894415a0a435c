// Copyright 2021 Locha Mesh Developers <contact@locha.io>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{crate_authors, crate_version, App, AppSettings, Arg, SubCommand};

use linkbind::commands::{self, PinState};
use linkbind::config::DiscoveryConfig;
use linkbind::discovery::{Orchestrator, SystemPortEnumerator};
use linkbind::registry::Registry;

/// The device catalog this front-end knows about. The core crate has no
/// opinion on logical device names; this is the thin command-catalog layer
/// the spec calls out as "only the shape is specified" (§6).
const KNOWN_DEVICES: &[(&str, u8)] = &[("gpio", 0x01), ("led", 0x02), ("turret", 0x03)];

fn main() -> Result<()> {
    let app = App::new("linkbind")
        .setting(AppSettings::ColoredHelp)
        .version(crate_version!())
        .author(crate_authors!())
        .about("Discovers and binds microcontroller peripherals over serial links\nProject website: https://locha.io/software/linkbind")
        .arg(
            Arg::with_name("timeout")
                .short("t")
                .long("timeout")
                .default_value("15")
                .help("Discovery timeout, in seconds"),
        )
        .arg(
            Arg::with_name("baud")
                .short("b")
                .long("baud")
                .default_value("115200")
                .help("Serial baud rate used on every discovered link"),
        )
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .help("Sets the level of verbosity, -v (debug), -vv (trace)"),
        )
        .subcommand(
            SubCommand::with_name("discover")
                .about("Discover and bind every known device, printing what bound"),
        )
        .subcommand(
            SubCommand::with_name("connect")
                .about("Discover and bind a single named device")
                .arg(
                    Arg::with_name("NAME")
                        .required(true)
                        .help("Logical device name to bind, e.g. `led`"),
                ),
        )
        .subcommand(
            SubCommand::with_name("gpio")
                .about("Set a GPIO pin's state on the bound `gpio` device")
                .arg(Arg::with_name("PIN").required(true).help("Pin number"))
                .arg(
                    Arg::with_name("STATE")
                        .required(true)
                        .possible_values(&["low", "high"])
                        .help("Pin state"),
                ),
        )
        .subcommand(
            SubCommand::with_name("led")
                .about("Set brightness on the bound `led` device")
                .arg(
                    Arg::with_name("BRIGHTNESS")
                        .required(true)
                        .help("Brightness, 0-255"),
                ),
        )
        .subcommand(
            SubCommand::with_name("turret")
                .about("Drive the bound `turret` device")
                .arg(Arg::with_name("ANGLE").required(true).help("Angle, 0-180"))
                .arg(Arg::with_name("POWER").required(true).help("Power, 0-100")),
        );

    let matches = app.get_matches();

    init_logger(match matches.occurrences_of("v") {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        2..=u64::MAX => log::LevelFilter::Trace,
    })?;

    let timeout = Duration::from_secs(matches.value_of("timeout").unwrap().parse()?);
    let mut config = DiscoveryConfig::default();
    config.link.baud = matches.value_of("baud").unwrap().parse()?;
    config.link.debug = matches.occurrences_of("v") >= 1;

    let registry = Arc::new(Registry::new());
    for (name, id) in KNOWN_DEVICES {
        registry.register(name, *id)?;
    }
    let orchestrator = Orchestrator::new(
        Arc::clone(&registry),
        Arc::new(SystemPortEnumerator),
        config,
    );

    match matches.subcommand() {
        ("discover", Some(_)) => {
            let connected = orchestrator.discover_all(timeout);
            if connected.is_empty() {
                println!("No devices bound within {:?}", timeout);
            }
            for device in connected {
                println!("{} bound on {:?}", device.name, device.bound_port);
            }
        }
        ("connect", Some(m)) => {
            let name = m.value_of("NAME").unwrap();
            match orchestrator.connect_one(name, timeout) {
                Some(device) => println!("{} bound on {:?}", device.name, device.bound_port),
                None => anyhow::bail!("`{}` did not bind within {:?}", name, timeout),
            }
        }
        ("gpio", Some(m)) => {
            let pin: u8 = m.value_of("PIN").unwrap().parse()?;
            let state = match m.value_of("STATE").unwrap() {
                "high" => PinState::High,
                _ => PinState::Low,
            };
            let link = connected_link(&orchestrator, &registry, "gpio", timeout)?;
            commands::gpio(&link, pin, state).context("failed to send GPIO command")?;
        }
        ("led", Some(m)) => {
            let brightness: u8 = m.value_of("BRIGHTNESS").unwrap().parse()?;
            let link = connected_link(&orchestrator, &registry, "led", timeout)?;
            commands::led(&link, brightness).context("failed to send LED command")?;
        }
        ("turret", Some(m)) => {
            let angle: u8 = m.value_of("ANGLE").unwrap().parse()?;
            let power: u8 = m.value_of("POWER").unwrap().parse()?;
            let link = connected_link(&orchestrator, &registry, "turret", timeout)?;
            commands::turret(&link, angle, power).context("failed to send turret command")?;
        }
        _ => {
            println!("Error: Sub-command required");
            println!("{}", matches.usage());
        }
    }

    Ok(())
}

/// Bind `name` if it isn't already connected, then return its link.
fn connected_link(
    orchestrator: &Orchestrator,
    registry: &Arc<Registry>,
    name: &str,
    timeout: Duration,
) -> Result<Arc<linkbind::link::Link>> {
    if registry.get(name).map(|d| d.status) != Some(linkbind::registry::DeviceStatus::Connected) {
        orchestrator
            .connect_one(name, timeout)
            .with_context(|| format!("`{}` did not bind within {:?}", name, timeout))?;
    }
    registry
        .bound_link(name)
        .ok_or_else(|| anyhow::anyhow!("`{}` has no bound link", name))
}

fn init_logger(level: log::LevelFilter) -> Result<()> {
    let mut logger = env_logger::Builder::from_env("LINKBIND_LOG");
    logger.filter_level(level);

    #[cfg(unix)]
    logger.format(log_format_color);
    #[cfg(not(unix))]
    logger.format(log_format_no_color);

    logger.try_init().context("failed to initialize logger")
}

#[cfg(unix)]
fn log_format_color(fmt: &mut env_logger::fmt::Formatter, record: &log::Record<'_>) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => ansi_term::Color::Red.bold().paint("ERROR"),
        log::Level::Warn => ansi_term::Color::Yellow.bold().paint("WARN"),
        log::Level::Info => ansi_term::Color::Green.bold().paint("INFO"),
        log::Level::Debug => ansi_term::Color::Cyan.bold().paint("DBG"),
        log::Level::Trace => ansi_term::Color::Cyan.bold().paint("TRACE"),
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}

#[cfg(not(unix))]
fn log_format_no_color(fmt: &mut env_logger::fmt::Formatter, record: &log::Record<'_>) -> io::Result<()> {
    let level = match record.level() {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN",
        log::Level::Info => "INFO",
        log::Level::Debug => "DBG",
        log::Level::Trace => "TRACE",
    };

    writeln!(fmt, "[{}] - {}", level, record.args())
}
