use opdi_port::PortDescriptor;
use opdi_protocol::MasterProtocol;
use serde_json::json;

use crate::cmd::{connect, StateArgs};
use crate::exit::{protocol_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_state, OutputFormat, StateReport};

pub fn run(args: StateArgs, format: OutputFormat) -> CliResult<i32> {
    let (device, protocol) = connect(&args.address)?;
    let report = query_state(&protocol, &args.port);
    device.disconnect();

    let report = report?;
    print_state(&report, format);
    Ok(SUCCESS)
}

pub(crate) fn query_state(protocol: &MasterProtocol, port: &str) -> CliResult<StateReport> {
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
            let (mode, line) = protocol
                .get_digital_state(port)
                .map_err(|err| protocol_error("state query failed", err))?;
            json!({ "mode": format!("{mode:?}"), "line": format!("{line:?}") })
        }
        PortDescriptor::Analog { .. } => {
            let state = protocol
                .get_analog_state(port)
                .map_err(|err| protocol_error("state query failed", err))?;
            json!({
                "mode": format!("{:?}", state.mode),
                "reference": format!("{:?}", state.reference),
                "resolution": state.resolution,
                "value": state.value,
            })
        }
        PortDescriptor::Select { labels, .. } => {
            let position = protocol
                .get_select_position(port)
                .map_err(|err| protocol_error("state query failed", err))?;
            let label = labels.get(position as usize).cloned();
            json!({ "position": position, "label": label })
        }
        PortDescriptor::Dial { .. } => {
            let position = protocol
                .get_dial_position(port)
                .map_err(|err| protocol_error("state query failed", err))?;
            json!({ "position": position })
        }
        PortDescriptor::Streaming { driver_id, .. } => {
            // streaming ports have no queryable state
            json!({ "driver": driver_id })
        }
    };

    Ok(StateReport {
        port: port.to_string(),
        port_type: descriptor.type_name(),
        state,
    })
}
