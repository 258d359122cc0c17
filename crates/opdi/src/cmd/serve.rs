use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use opdi_frame::{MessageConfig, MessageReader, MessageWriter};
use opdi_port::{
    flags, AnalogPort, ChangeSource, DialPort, DigitalPort, Port, PortDirCaps, PortGroup,
    RefreshMode, SelectPort, StreamingDriver, StreamingPort,
};
use opdi_protocol::Slave;
use opdi_transport::TcpEndpoint;
use tracing::{info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{transport_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let endpoint =
        TcpEndpoint::bind(&args.listen).map_err(|err| transport_error("bind failed", err))?;
    info!(addr = %endpoint.local_addr(), name = %args.name, "demo slave listening");

    let mut slave = build_demo_slave(&args)?;
    let shutdown = slave.shutdown_handle();
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            if !running.swap(false, Ordering::SeqCst) {
                // second interrupt: we were blocked in accept, give up
                std::process::exit(130);
            }
            shutdown.store(true, Ordering::SeqCst);
        })
        .expect("failed to install interrupt handler");
    }

    // the ambient light reading drifts once a second, demonstrating
    // unsolicited refreshes
    let mut last_tick = Instant::now();
    let work = move |ports: &mut [Port]| -> Result<(), opdi_port::PortError> {
        if last_tick.elapsed() >= Duration::from_secs(1) {
            last_tick = Instant::now();
            for port in ports.iter_mut() {
                if let Port::Analog(analog) = port {
                    if analog.base().id() == "ambient" {
                        let next = (analog.value() + 7) % 256;
                        analog.set_value(next, ChangeSource::Internal)?;
                    }
                }
            }
        }
        Ok(())
    };

    while running.load(Ordering::SeqCst) {
        let stream = match endpoint.accept() {
            Ok(stream) => stream,
            Err(err) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                return Err(transport_error("accept failed", err));
            }
        };

        let reader_stream = stream
            .try_clone()
            .map_err(|err| transport_error("clone failed", err))?;
        let mut reader = MessageReader::for_stream(reader_stream, MessageConfig::default())
            .map_err(|err| CliError::new(INTERNAL, err.to_string()))?;
        let mut writer = MessageWriter::for_stream(stream, MessageConfig::default());

        match slave.run(&mut reader, &mut writer, work.clone()) {
            Ok(reason) => info!(?reason, "session ended"),
            Err(err) => warn!(error = %err, "session failed"),
        }
    }

    info!("demo slave stopped");
    Ok(SUCCESS)
}

fn build_demo_slave(args: &ServeArgs) -> CliResult<Slave> {
    let mut slave = Slave::new(args.name.as_str());
    slave.set_idle_timeout(Duration::from_secs(args.idle_timeout));

    slave
        .add_group(PortGroup::new("demo", "Demo Ports", 0))
        .expect("fresh registry accepts the group");

    let mut door = DigitalPort::new(
        "door",
        "Door Contact",
        PortDirCaps::Bidirectional,
        flags::DIGITAL_HAS_PULLUP,
    );
    door.base_mut().set_group(Some("demo".into()));

    let mut dimmer = AnalogPort::new(
        "dimmer",
        "Dimmer",
        PortDirCaps::Output,
        flags::ANALOG_RESOLUTION_8 | flags::ANALOG_RESOLUTION_10 | flags::ANALOG_CAN_CHANGE_RESOLUTION,
    );
    dimmer.base_mut().set_group(Some("demo".into()));

    let mut ambient = AnalogPort::new(
        "ambient",
        "Ambient Light",
        PortDirCaps::Input,
        flags::ANALOG_RESOLUTION_8,
    );
    ambient.base_mut().set_refresh_mode(RefreshMode::Auto);
    ambient.base_mut().set_unit(Some("lux".into()));

    let mode = SelectPort::new(
        "mode",
        "Operating Mode",
        0,
        vec!["off".into(), "eco".into(), "comfort".into()],
    )
    .expect("item list is within bounds");

    let volume = DialPort::new("volume", "Volume", 0, 0, 100, 5)
        .expect("range parameters are valid");

    let mut text = StreamingPort::new("text", "Text Console", "text", 0);
    text.attach_driver(Box::new(EchoDriver::default()));

    for port in [
        Port::from(door),
        Port::from(dimmer),
        Port::from(ambient),
        Port::from(mode),
        Port::from(volume),
        Port::from(text),
    ] {
        slave
            .add_port(port)
            .expect("demo port IDs are unique");
    }

    Ok(slave)
}

/// Demo streaming driver: everything written comes back on read.
#[derive(Default)]
struct EchoDriver {
    buf: std::collections::VecDeque<u8>,
}

impl StreamingDriver for EchoDriver {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend(data);
        Ok(data.len())
    }

    fn available(&mut self, hint: usize) -> std::io::Result<usize> {
        Ok(self.buf.len().min(hint))
    }

    fn read(&mut self) -> std::io::Result<u8> {
        self.buf
            .pop_front()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::WouldBlock))
    }
}
