use opdi_port::{DigitalLine, DigitalMode, PortDescriptor};
use serde_json::json;

use crate::cmd::{connect, SetArgs};
use crate::exit::{protocol_error, usage, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_state, OutputFormat, StateReport};

pub fn run(args: SetArgs, format: OutputFormat) -> CliResult<i32> {
    let (device, protocol) = connect(&args.address)?;
    let result = apply(&protocol, &args);
    device.disconnect();

    let report = result?;
    print_state(&report, format);
    Ok(SUCCESS)
}

fn apply(
    protocol: &opdi_protocol::MasterProtocol,
    args: &SetArgs,
) -> CliResult<StateReport> {
    let port = args.port.as_str();
    let descriptor = protocol
        .get_port_info(port)
        .map_err(|err| protocol_error("port info query failed", err))?
        .ok_or_else(|| {
            CliError::new(
                DATA_INVALID,
                format!("port {port:?} has an unsupported type"),
            )
        })?;

    let state = match &descriptor {
        PortDescriptor::Digital { .. } => {
            let (mode, line) = match (&args.mode, &args.line) {
                (Some(mode), None) => protocol
                    .set_digital_mode(port, parse_mode(mode)?)
                    .map_err(|err| protocol_error("set mode failed", err))?,
                (None, Some(line)) => protocol
                    .set_digital_line(port, parse_line(line)?)
                    .map_err(|err| protocol_error("set line failed", err))?,
                _ => {
                    return Err(usage(
                        "digital ports take exactly one of --mode or --line",
                    ))
                }
            };
            json!({ "mode": format!("{mode:?}"), "line": format!("{line:?}") })
        }
        PortDescriptor::Analog { .. } => {
            let value = args
                .value
                .ok_or_else(|| usage("analog ports take --value"))?;
            let state = protocol
                .set_analog_value(port, value)
                .map_err(|err| protocol_error("set value failed", err))?;
            json!({ "value": state.value, "resolution": state.resolution })
        }
        PortDescriptor::Select { .. } => {
            let position = args
                .position
                .ok_or_else(|| usage("select ports take --position"))?;
            let position = u16::try_from(position)
                .map_err(|_| usage("select position must be a small non-negative number"))?;
            let position = protocol
                .set_select_position(port, position)
                .map_err(|err| protocol_error("set position failed", err))?;
            json!({ "position": position })
        }
        PortDescriptor::Dial { .. } => {
            let position = args
                .position
                .ok_or_else(|| usage("dial ports take --position"))?;
            let position = protocol
                .set_dial_position(port, position)
                .map_err(|err| protocol_error("set position failed", err))?;
            json!({ "position": position })
        }
        PortDescriptor::Streaming { .. } => {
            return Err(CliError::new(
                DATA_INVALID,
                "streaming ports have no settable state",
            ));
        }
    };

    Ok(StateReport {
        port: port.to_string(),
        port_type: descriptor.type_name(),
        state,
    })
}

fn parse_mode(input: &str) -> CliResult<DigitalMode> {
    match input {
        "input" | "floating" | "0" => Ok(DigitalMode::InputFloating),
        "pullup" | "1" => Ok(DigitalMode::InputPullup),
        "pulldown" | "2" => Ok(DigitalMode::InputPulldown),
        "output" | "3" => Ok(DigitalMode::Output),
        other => Err(usage(format!(
            "unknown mode {other:?} (expected input, pullup, pulldown or output)"
        ))),
    }
}

fn parse_line(input: &str) -> CliResult<DigitalLine> {
    match input {
        "low" | "0" => Ok(DigitalLine::Low),
        "high" | "1" => Ok(DigitalLine::High),
        other => Err(usage(format!(
            "unknown line {other:?} (expected low or high)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_parse() {
        assert_eq!(parse_mode("output").unwrap(), DigitalMode::Output);
        assert_eq!(parse_mode("1").unwrap(), DigitalMode::InputPullup);
        assert!(parse_mode("sideways").is_err());
    }

    #[test]
    fn line_names_parse() {
        assert_eq!(parse_line("high").unwrap(), DigitalLine::High);
        assert_eq!(parse_line("0").unwrap(), DigitalLine::Low);
        assert!(parse_line("up").is_err());
    }
}
