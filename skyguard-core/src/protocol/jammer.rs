//! RF jammer HTTP/JSON API
//!
//! The jammer exposes three POST endpoints taking compact JSON bodies:
//!
//! | Path | Body |
//! |------|------|
//! | `/interferenceControl` | `{"switch":0\|1}` |
//! | `/setWriteFreq` | `{"writeFreq":[{endFreq,freqType,isErrMsg:"",isSelect:1,startFreq}, ...]}` |
//! | `/setFixedFreq` | `{"constFreq":[...]}` with the same elements |
//!
//! Responses are free-form text and are only logged.

use std::net::SocketAddrV4;

use serde::Serialize;

use crate::error::CommandError;
use crate::model::JammerConfig;

/// Default HTTP port of the jammer controller
pub const DEFAULT_PORT: u16 = 8090;

pub const PATH_SWITCH: &str = "/interferenceControl";
pub const PATH_WRITE_FREQ: &str = "/setWriteFreq";
pub const PATH_FIXED_FREQ: &str = "/setFixedFreq";

/// One encoded POST, relative to the jammer's base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JammerRequest {
    pub path: &'static str,
    pub body: String,
}

impl JammerRequest {
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url, self.path)
    }
}

/// `http://ip:port` without a trailing slash
pub fn base_url(addr: SocketAddrV4) -> String {
    format!("http://{}:{}", addr.ip(), addr.port())
}

#[derive(Serialize)]
struct SwitchBody {
    switch: u8,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
/// Fields in the device firmware's key order
struct FreqItem {
    end_freq: f64,
    freq_type: i32,
    /// Always empty on requests
    is_err_msg: &'static str,
    is_select: u8,
    start_freq: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteFreqBody {
    write_freq: Vec<FreqItem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FixedFreqBody {
    const_freq: Vec<FreqItem>,
}

fn freq_items(configs: &[JammerConfig]) -> Vec<FreqItem> {
    configs
        .iter()
        .map(|c| FreqItem {
            end_freq: c.end_freq,
            freq_type: c.freq_type,
            is_err_msg: "",
            is_select: 1,
            start_freq: c.start_freq,
        })
        .collect()
}

pub fn create_switch_request(enable: bool) -> Result<JammerRequest, CommandError> {
    Ok(JammerRequest {
        path: PATH_SWITCH,
        body: serde_json::to_string(&SwitchBody {
            switch: enable as u8,
        })?,
    })
}

/// Sweep ranges
pub fn create_write_freq_request(configs: &[JammerConfig]) -> Result<JammerRequest, CommandError> {
    Ok(JammerRequest {
        path: PATH_WRITE_FREQ,
        body: serde_json::to_string(&WriteFreqBody {
            write_freq: freq_items(configs),
        })?,
    })
}

/// Fixed frequencies
pub fn create_fixed_freq_request(configs: &[JammerConfig]) -> Result<JammerRequest, CommandError> {
    Ok(JammerRequest {
        path: PATH_FIXED_FREQ,
        body: serde_json::to_string(&FixedFreqBody {
            const_freq: freq_items(configs),
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn bands() -> Vec<JammerConfig> {
        vec![
            JammerConfig {
                freq_type: 1,
                start_freq: 2400.0,
                end_freq: 2483.5,
            },
            JammerConfig {
                freq_type: 2,
                start_freq: 5725.0,
                end_freq: 5850.0,
            },
        ]
    }

    #[test]
    fn test_switch_request() {
        let req = create_switch_request(true).unwrap();
        assert_eq!(req.path, "/interferenceControl");
        assert_eq!(req.body, r#"{"switch":1}"#);
        assert_eq!(create_switch_request(false).unwrap().body, r#"{"switch":0}"#);
    }

    #[test]
    fn test_write_freq_request() {
        let req = create_write_freq_request(&bands()[..1]).unwrap();
        assert_eq!(req.path, "/setWriteFreq");
        assert_eq!(
            req.body,
            r#"{"writeFreq":[{"endFreq":2483.5,"freqType":1,"isErrMsg":"","isSelect":1,"startFreq":2400.0}]}"#
        );
    }

    #[test]
    fn test_fixed_freq_request() {
        let req = create_fixed_freq_request(&bands()).unwrap();
        assert_eq!(req.path, "/setFixedFreq");
        let value: serde_json::Value = serde_json::from_str(&req.body).unwrap();
        let items = value["constFreq"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["freqType"], 2);
        assert_eq!(items[1]["isSelect"], 1);
        assert_eq!(items[1]["isErrMsg"], "");

        let empty = create_fixed_freq_request(&[]).unwrap();
        assert_eq!(empty.body, r#"{"constFreq":[]}"#);
    }

    #[test]
    fn test_url() {
        let base = base_url(SocketAddrV4::new(Ipv4Addr::new(192, 178, 1, 12), 8090));
        assert_eq!(base, "http://192.178.1.12:8090");
        let req = create_switch_request(true).unwrap();
        assert_eq!(req.url(&base), "http://192.178.1.12:8090/interferenceControl");
    }
}
