//! Bridge control socket
//!
//! Line-delimited JSON over TCP. Each request line gets exactly one response
//! line; gesture-driven state changes are pushed in between as `Event` lines.
//!
//! ```text
//! -> "List"
//! <- {"Accessories":[{"manufacturer":"Flic.", ..., "on":false}]}
//! -> {"SetState":{"serial":"80:e4:da:71:2b:0c","value":true}}
//! <- "Ok"
//! <- {"Event":{"serial":"80:e4:da:71:2b:0c","on":false}}
//! ```

use crate::accessory::{AccessoryInfo, AccessoryRegistry, StateChange};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum BridgeRequest {
    List,
    GetState { serial: String },
    SetState { serial: String, value: bool },
    Identify { serial: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AccessoryStatus {
    #[serde(flatten)]
    pub info: AccessoryInfo,
    pub on: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum BridgeResponse {
    Accessories(Vec<AccessoryStatus>),
    State { serial: String, value: bool },
    Ok,
    Error(String),
    Event(StateChange),
}

pub struct BridgeServer {
    registry: Arc<AccessoryRegistry>,
    events: broadcast::Sender<StateChange>,
}

impl BridgeServer {
    pub fn new(registry: Arc<AccessoryRegistry>, events: broadcast::Sender<StateChange>) -> Self {
        Self { registry, events }
    }

    /// Accept bridge clients until the listener fails
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        info!("Bridge control listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            info!("Bridge client connected: {}", peer);

            let registry = self.registry.clone();
            let events = self.events.subscribe();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, registry, events).await {
                    error!("Bridge connection error: {}", e);
                }
                info!("Bridge client disconnected: {}", peer);
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    registry: Arc<AccessoryRegistry>,
    mut events: broadcast::Receiver<StateChange>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut events_open = true;

    loop {
        let response = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => match serde_json::from_str::<BridgeRequest>(&line) {
                    Ok(request) => {
                        debug!("Bridge request: {:?}", request);
                        execute_request(&registry, request)
                    }
                    Err(e) => BridgeResponse::Error(format!("Invalid request: {}", e)),
                },
                None => break,
            },
            event = events.recv(), if events_open => match event {
                Ok(change) => BridgeResponse::Event(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Bridge client fell behind, {} state events dropped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    events_open = false;
                    continue;
                }
            },
        };

        let json = serde_json::to_string(&response)? + "\n";
        write_half.write_all(json.as_bytes()).await?;
        write_half.flush().await?;
    }

    Ok(())
}

pub fn execute_request(registry: &AccessoryRegistry, request: BridgeRequest) -> BridgeResponse {
    match request {
        BridgeRequest::List => BridgeResponse::Accessories(
            registry
                .iter()
                .map(|accessory| AccessoryStatus {
                    info: accessory.info().clone(),
                    on: accessory.get_state(),
                })
                .collect(),
        ),
        BridgeRequest::GetState { serial } => match registry.get(&serial) {
            Some(accessory) => BridgeResponse::State {
                serial: accessory.info().serial.clone(),
                value: accessory.get_state(),
            },
            None => unknown_accessory(&serial),
        },
        BridgeRequest::SetState { serial, value } => match registry.get(&serial) {
            Some(accessory) => {
                accessory.set_state(value);
                BridgeResponse::Ok
            }
            None => unknown_accessory(&serial),
        },
        BridgeRequest::Identify { serial } => match registry.get(&serial) {
            Some(accessory) => {
                accessory.identify();
                BridgeResponse::Ok
            }
            None => unknown_accessory(&serial),
        },
    }
}

fn unknown_accessory(serial: &str) -> BridgeResponse {
    BridgeResponse::Error(format!("Unknown accessory: {}", serial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::AccessoryAdapter;
    use crate::domain::settings::AccessoryConfig;
    use std::time::Duration;
    use tokio::io::Lines;
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

    const SERIAL: &str = "80:e4:da:71:2b:0c";

    fn registry(events: &broadcast::Sender<StateChange>) -> Arc<AccessoryRegistry> {
        let mut config = AccessoryConfig::new(SERIAL);
        config.name = "Desk Lamp".to_string();
        let adapter = AccessoryAdapter::new(&config, Duration::from_millis(300), events.clone())
            .unwrap();
        let mut registry = AccessoryRegistry::new();
        registry.register(Arc::new(adapter)).unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_request_wire_format() {
        let request: BridgeRequest = serde_json::from_str(
            r#"{"SetState":{"serial":"80:e4:da:71:2b:0c","value":true}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            BridgeRequest::SetState {
                serial: SERIAL.to_string(),
                value: true
            }
        );
        assert_eq!(
            serde_json::from_str::<BridgeRequest>(r#""List""#).unwrap(),
            BridgeRequest::List
        );
        assert_eq!(serde_json::to_string(&BridgeResponse::Ok).unwrap(), r#""Ok""#);
    }

    #[test]
    fn test_get_and_set_state() {
        let (tx, _rx) = broadcast::channel(4);
        let registry = registry(&tx);

        let get = BridgeRequest::GetState {
            serial: SERIAL.to_uppercase(),
        };
        assert_eq!(
            execute_request(&registry, get),
            BridgeResponse::State {
                serial: SERIAL.to_string(),
                value: false
            }
        );

        let set = BridgeRequest::SetState {
            serial: SERIAL.to_string(),
            value: true,
        };
        assert_eq!(execute_request(&registry, set), BridgeResponse::Ok);
        assert!(registry.get(SERIAL).unwrap().get_state());
    }

    #[test]
    fn test_list_and_identify() {
        let (tx, _rx) = broadcast::channel(4);
        let registry = registry(&tx);

        match execute_request(&registry, BridgeRequest::List) {
            BridgeResponse::Accessories(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].info.name, "Desk Lamp");
                assert!(!list[0].on);
            }
            other => panic!("unexpected response {:?}", other),
        }

        let identify = BridgeRequest::Identify {
            serial: SERIAL.to_string(),
        };
        assert_eq!(execute_request(&registry, identify), BridgeResponse::Ok);
    }

    #[test]
    fn test_unknown_serial() {
        let (tx, _rx) = broadcast::channel(4);
        let registry = registry(&tx);
        let response = execute_request(
            &registry,
            BridgeRequest::GetState {
                serial: "00:00:00:00:00:01".to_string(),
            },
        );
        assert!(matches!(response, BridgeResponse::Error(_)));
    }

    async fn roundtrip(
        writer: &mut OwnedWriteHalf,
        lines: &mut Lines<BufReader<OwnedReadHalf>>,
        request: &str,
    ) -> BridgeResponse {
        writer.write_all(request.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        next_response(lines).await
    }

    async fn next_response(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> BridgeResponse {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_socket_session() {
        let (tx, _rx) = broadcast::channel(4);
        let registry = registry(&tx);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        tokio::spawn(BridgeServer::new(registry, tx.clone()).run(listener));

        let (read_half, mut writer) = TcpStream::connect(local).await.unwrap().into_split();
        let mut lines = BufReader::new(read_half).lines();

        assert!(matches!(
            roundtrip(&mut writer, &mut lines, r#""List""#).await,
            BridgeResponse::Accessories(_)
        ));
        assert_eq!(
            roundtrip(
                &mut writer,
                &mut lines,
                r#"{"SetState":{"serial":"80:e4:da:71:2b:0c","value":true}}"#
            )
            .await,
            BridgeResponse::Ok
        );
        assert_eq!(
            roundtrip(&mut writer, &mut lines, r#"{"GetState":{"serial":"80:e4:da:71:2b:0c"}}"#)
                .await,
            BridgeResponse::State {
                serial: SERIAL.to_string(),
                value: true
            }
        );
        assert!(matches!(
            roundtrip(&mut writer, &mut lines, "{ nope").await,
            BridgeResponse::Error(_)
        ));

        let change = StateChange {
            serial: SERIAL.to_string(),
            on: false,
        };
        tx.send(change.clone()).unwrap();
        assert_eq!(next_response(&mut lines).await, BridgeResponse::Event(change));
    }
}
