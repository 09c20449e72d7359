//! Daemon socket protocol
//!
//! The CLI and the daemon exchange exactly one newline-terminated JSON
//! value per connection in each direction: the client writes one
//! [`DaemonRequest`] line, the daemon writes back one [`DaemonResponse`]
//! line, and the connection closes. No framing beyond the newline is
//! needed since `serde_json` never emits an embedded `\n`.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;

use serde::{Deserialize, Serialize};

use etmem_rs::error::{EtmemError, Result};

/// A CLI-to-daemon request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// `etmem project add -n <name> -f <file>`: load `file` and start
    /// running it as `name`.
    ProjectAdd {
        /// Project name to register.
        name: String,
        /// Path to the project's JSON config file.
        file: String,
    },
    /// `etmem project del -n <name>`: stop and remove the named project.
    ProjectDel {
        /// Project name to remove.
        name: String,
    },
    /// `etmem project show`: list every running project.
    ProjectShow,
}

/// Summary of one running project, as returned by `ProjectShow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    /// Project name.
    pub name: String,
    /// Number of tasks the project runs.
    pub task_count: usize,
    /// Scan passes per invocation.
    pub loop_count: u32,
    /// Seconds between scan passes.
    pub sleep_secs: u32,
}

/// A daemon-to-CLI response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DaemonResponse {
    /// The request succeeded.
    Ok {
        /// Human-readable confirmation.
        message: String,
    },
    /// `ProjectShow`'s payload.
    Projects {
        /// One summary per running project.
        projects: Vec<ProjectSummary>,
    },
    /// The request failed.
    Err {
        /// Human-readable failure description.
        message: String,
    },
}

fn read_line(stream: &UnixStream) -> Result<String> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .map_err(|e| EtmemError::IoError(e.to_string()))?;
    if line.is_empty() {
        return Err(EtmemError::ProtocolError(
            "connection closed before a line arrived".to_string(),
        ));
    }
    Ok(line)
}

/// Write one request as a newline-terminated JSON line (client side).
pub fn write_request(stream: &mut UnixStream, request: &DaemonRequest) -> Result<()> {
    let line = serde_json::to_string(request).map_err(|e| EtmemError::ProtocolError(e.to_string()))?;
    writeln!(stream, "{line}").map_err(|e| EtmemError::IoError(e.to_string()))
}

/// Read one newline-terminated JSON response (client side).
pub fn read_response(stream: &UnixStream) -> Result<DaemonResponse> {
    let line = read_line(stream)?;
    serde_json::from_str(line.trim_end()).map_err(|e| EtmemError::ProtocolError(e.to_string()))
}

/// Read one newline-terminated JSON request (daemon side).
pub fn read_request(stream: &UnixStream) -> Result<DaemonRequest> {
    let line = read_line(stream)?;
    serde_json::from_str(line.trim_end()).map_err(|e| EtmemError::ProtocolError(e.to_string()))
}

/// Write one response as a newline-terminated JSON line (daemon side).
pub fn write_response(stream: &mut UnixStream, response: &DaemonResponse) -> Result<()> {
    let line =
        serde_json::to_string(response).map_err(|e| EtmemError::ProtocolError(e.to_string()))?;
    writeln!(stream, "{line}").map_err(|e| EtmemError::IoError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = DaemonRequest::ProjectAdd {
            name: "demo".to_string(),
            file: "/etc/etmem/demo.json".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let parsed: DaemonRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn response_round_trips_through_json() {
        let resp = DaemonResponse::Projects {
            projects: vec![ProjectSummary {
                name: "demo".to_string(),
                task_count: 2,
                loop_count: 3,
                sleep_secs: 1,
            }],
        };
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: DaemonResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
    }

    #[test]
    fn request_and_response_cross_a_real_unix_socket_pair() {
        let (mut client, server) = UnixStream::pair().unwrap();
        let request = DaemonRequest::ProjectDel {
            name: "demo".to_string(),
        };
        write_request(&mut client, &request).unwrap();
        let received = read_request(&server).unwrap();
        assert_eq!(received, request);

        let mut server = server;
        let response = DaemonResponse::Ok {
            message: "project demo stopped".to_string(),
        };
        write_response(&mut server, &response).unwrap();
        let received = read_response(&client).unwrap();
        assert_eq!(received, response);
    }

    #[test]
    fn reading_from_a_closed_connection_is_a_protocol_error() {
        let (client, server) = UnixStream::pair().unwrap();
        drop(client);
        assert!(matches!(
            read_request(&server),
            Err(EtmemError::ProtocolError(_))
        ));
    }
}
