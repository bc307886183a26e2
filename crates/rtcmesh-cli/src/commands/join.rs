use std::sync::Arc;

use rtcmesh_config::RtcMeshConfig;
use rtcmesh_core::MeshError;
use rtcmesh_mesh::{MeshClient, MeshEvent, MeshOptions, PeerConnectionFactory, signaling};
use serde_json::json;
use tracing::{debug, info, warn};

pub(super) async fn cmd_join(
    config: RtcMeshConfig,
    name: Option<String>,
    subscribe: Vec<String>,
) -> rtcmesh_core::Result<()> {
    let name = name.or(config.mesh.peer_name.clone()).ok_or_else(|| {
        MeshError::config("no peer name: pass --name or set mesh.peer_name in rtcmesh.toml")
    })?;
    let options = MeshOptions::from(&config.mesh);

    let (handle, signaling_events) =
        signaling::connect(&options.signal_server, options.keepalive_interval).await?;
    let server = options.signal_server.clone();
    let (client, mut events) =
        MeshClient::start(name.clone(), options, transport(), handle, signaling_events);

    println!("🕸️  Joined mesh as '{name}' via {server}");
    println!("   Press Ctrl-C to leave.\n");

    let mut subscribed = subscribe.is_empty();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    MeshEvent::PeerConnect(peer) => {
                        let via = match client.is_relayed(&peer) {
                            Some(true) => "relay",
                            _ => "direct",
                        };
                        println!("   📡 {peer} connected ({via})");
                        if !subscribed {
                            subscribed = true;
                            subscribe_all(&client, &subscribe);
                        }
                    }
                    MeshEvent::PeerClose(peer) => println!("   👋 {peer} left"),
                    MeshEvent::PeerError(peer, e) => warn!(peer = %peer, error = %e, "peer failed"),
                    MeshEvent::PeerSignal(peer, _) => debug!(peer = %peer, "negotiation signal sent"),
                    MeshEvent::Request(request) if request.kind == "ping" => {
                        tokio::spawn(async move {
                            if let Err(e) = request.respond(json!("pong")).await {
                                debug!(error = %e, "pong not delivered");
                            }
                        });
                    }
                    MeshEvent::Request(request) => {
                        println!("   📨 {} → {} {}", request.peer, request.kind, request.payload);
                    }
                    MeshEvent::SignalingClosed => {
                        println!("❌ Lost connection to {server}");
                        break;
                    }
                }
            }
        }
    }

    client.shutdown().await;
    println!("👋 Left the mesh");
    Ok(())
}

fn subscribe_all(client: &MeshClient, topics: &[String]) {
    for topic in topics {
        let client = client.clone();
        let topic = topic.clone();
        tokio::spawn(async move {
            let acks = client.subscribe(&topic, None).await;
            let shared = acks.iter().filter(|a| **a).count();
            info!(topic = %topic, peers = acks.len(), shared, "subscription announced");
            println!("   🔔 subscribed to '{topic}' ({shared}/{} peers share it)", acks.len());
        });
    }
}

#[cfg(feature = "webrtc")]
fn transport() -> Arc<dyn PeerConnectionFactory> {
    Arc::new(rtcmesh_mesh::webrtc::WebRtcConnectionFactory::new())
}

#[cfg(not(feature = "webrtc"))]
fn transport() -> Arc<dyn PeerConnectionFactory> {
    info!("built without webrtc support, every peer will use the signaling relay");
    Arc::new(rtcmesh_mesh::RelayOnlyFactory)
}
