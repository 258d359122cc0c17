pub mod caps;
pub mod serve;
pub mod set;
pub mod state;

use std::sync::Arc;

use clap::{Args, Subcommand};
use opdi_protocol::{Device, DeviceAddress, MasterProtocol, NullListener};

use crate::exit::{protocol_error, usage, CliResult};
use crate::output::OutputFormat;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the ports a device exposes.
    Caps(CapsArgs),
    /// Query the state of one port.
    State(StateArgs),
    /// Change a port's mode, line, value or position.
    Set(SetArgs),
    /// Run a demo slave device.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct CapsArgs {
    /// Device address (opdi_tcp://[user:pass@]host[:port]).
    pub address: String,
}

#[derive(Args, Debug)]
pub struct StateArgs {
    /// Device address.
    pub address: String,
    /// Port ID.
    pub port: String,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Device address.
    pub address: String,
    /// Port ID.
    pub port: String,
    /// Digital mode: input, pullup, pulldown or output.
    #[arg(long, conflicts_with_all = ["value", "position"])]
    pub mode: Option<String>,
    /// Digital line: low or high.
    #[arg(long, conflicts_with_all = ["value", "position"])]
    pub line: Option<String>,
    /// Analog raw value.
    #[arg(long)]
    pub value: Option<i32>,
    /// Select or dial position.
    #[arg(long, conflicts_with = "value")]
    pub position: Option<i64>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:13110")]
    pub listen: String,
    /// Device name announced to masters.
    #[arg(long, default_value = "opdi-demo")]
    pub name: String,
    /// Idle timeout in seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    pub idle_timeout: u64,
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Caps(args) => caps::run(args, format),
        Command::State(args) => state::run(args, format),
        Command::Set(args) => set::run(args, format),
        Command::Serve(args) => serve::run(args),
    }
}

/// Parse an address and open a synchronous master session.
pub(crate) fn connect(address: &str) -> CliResult<(Arc<Device>, Arc<MasterProtocol>)> {
    let address: DeviceAddress = address
        .parse()
        .map_err(|err| usage(format!("{err}")))?;
    let device = Arc::new(Device::new("console", address));
    let protocol = device
        .connect_blocking(Arc::new(NullListener), None)
        .map_err(|err| protocol_error("connect failed", err))?;
    Ok((device, protocol))
}
