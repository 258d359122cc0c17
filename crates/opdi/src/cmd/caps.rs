use crate::cmd::{connect, CapsArgs};
use crate::exit::{protocol_error, CliResult, SUCCESS};
use crate::output::{print_capabilities, OutputFormat};

pub fn run(args: CapsArgs, format: OutputFormat) -> CliResult<i32> {
    let (device, protocol) = connect(&args.address)?;

    let caps = protocol
        .get_device_capabilities()
        .map_err(|err| protocol_error("capability query failed", err))?;
    print_capabilities(&caps, format);

    device.disconnect();
    Ok(SUCCESS)
}
