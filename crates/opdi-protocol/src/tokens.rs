//! Magic tokens of the basic protocol's data-channel messages.
//!
//! A request's leading token selects the operation; the reply's leading token
//! identifies the authoritative state message the caller must receive on the
//! same channel.

pub const GET_DEVICE_CAPS: &str = "gDC";
pub const DEVICE_CAPS: &str = "BDC";
pub const GET_PORT_INFO: &str = "gPI";

pub const DIGITAL_STATE: &str = "DS";
pub const GET_DIGITAL_STATE: &str = "gDS";
pub const SET_DIGITAL_LINE: &str = "sDL";
pub const SET_DIGITAL_MODE: &str = "sDM";

pub const ANALOG_STATE: &str = "AS";
pub const GET_ANALOG_STATE: &str = "gAS";
pub const SET_ANALOG_VALUE: &str = "sAV";
pub const SET_ANALOG_MODE: &str = "sAM";
pub const SET_ANALOG_RESOLUTION: &str = "sAR";
pub const SET_ANALOG_REFERENCE: &str = "sARF";

pub const SELECT_LABEL: &str = "SL";
pub const GET_SELECT_LABEL: &str = "gSL";
pub const SELECT_STATE: &str = "SS";
pub const GET_SELECT_STATE: &str = "gSS";
pub const SET_SELECT_POSITION: &str = "sSP";

pub const DIAL_STATE: &str = "DLS";
pub const GET_DIAL_STATE: &str = "gDLS";
pub const SET_DIAL_POSITION: &str = "sDLP";

pub const BIND_STREAMING_PORT: &str = "bSP";
pub const UNBIND_STREAMING_PORT: &str = "uSP";
