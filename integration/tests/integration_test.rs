//! Integration tests for the psubank crate.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use psubank::*;

use tokio::runtime::Runtime;

const DESCRIPTIONS: [&str; 2] = ["Dipole magnet", "Quadrupole magnet"];

async fn wait_for<F>(render: &RenderHandle, what: &str, condition: F) -> Snapshot
where
    F: Fn(&Snapshot) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = render.snapshot();
        if condition(&snapshot) {
            return snapshot;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}: {snapshot:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn remote_config(server: SocketAddr) -> RemoteConfig {
    RemoteConfig {
        server,
        tick_rate: TickRate::new(TickRate::MAX).unwrap(),
        decode: DecodeLevel::default(),
    }
}

async fn test_remote_mirrors_a_sector_table() {
    let table = Arc::new(Mutex::new(ServerTable::new(
        IdentificationLabel::build_stamp(),
        &DESCRIPTIONS,
    )));

    let listener = tokio::net::TcpListener::bind(SocketAddr::from_str("127.0.0.1:0").unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve(listener, table.clone(), DecodeLevel::default()));

    let system = spawn_remote(remote_config(addr));
    let render = system.render();

    let snapshot = wait_for(&render, "the channel descriptions", |x| {
        x.client_state == Some(TcpClientState::NoError)
            && x.channels.len() == 2
            && x.channels[1].description == DESCRIPTIONS[1]
    })
    .await;
    assert_eq!(snapshot.mode, Mode::Remote);
    assert_eq!(snapshot.channels[0].description, DESCRIPTIONS[0]);
    assert!(!snapshot.control_here);

    // orders are refused until the local computer hands over control
    assert_eq!(
        render.place_order(0, Order::PowerOn),
        Err(OrderError::ControlElsewhere)
    );
    table.lock().unwrap().set_remote_control(true);
    wait_for(&render, "control", |x| x.control_here).await;

    let order = Order::SetValue(SetPoint::from_amperes(42.0));
    render.place_order(1, order).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(received) = table.lock().unwrap().take_order(1) {
            assert_eq!(received, order);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "order never reached the table"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // handing control back is seen by the remote computer
    table.lock().unwrap().set_remote_control(false);
    wait_for(&render, "control to return", |x| !x.control_here).await;

    system.shutdown();
    server.abort();
}

async fn test_remote_mirrors_a_local_computer() {
    let roster = Roster::new(vec![ChannelConfig {
        id: 7,
        port: "/dev/psubank-port-that-does-not-exist".to_string(),
        description: DESCRIPTIONS[0].to_string(),
    }])
    .unwrap();

    let local = spawn_local(LocalConfig {
        roster,
        listen: SocketAddr::from_str("127.0.0.1:0").unwrap(),
        tick_rate: TickRate::new(TickRate::MAX).unwrap(),
        decode: DecodeLevel::default(),
    })
    .await
    .unwrap();
    let addr = local.server_address().unwrap();

    let local_render = local.render();
    let snapshot = local_render.snapshot();
    assert_eq!(snapshot.mode, Mode::Local);
    assert!(snapshot.control_here);
    assert_eq!(snapshot.client_state, None);

    let remote = spawn_remote(remote_config(addr));
    let snapshot = wait_for(&remote.render(), "the mirrored channel", |x| {
        x.client_state == Some(TcpClientState::NoError) && x.channels.len() == 1
    })
    .await;
    assert_eq!(snapshot.channels[0].description, DESCRIPTIONS[0]);
    assert_eq!(snapshot.channels[0].state, CommunicationState::PortNotOpen);
    assert!(!snapshot.channels[0].power_on);

    // the local operator hands over control and the remote computer sees it
    local_render.set_remote_control(true).unwrap();
    assert_eq!(
        local_render.place_order(0, Order::PowerOn),
        Err(OrderError::ControlElsewhere)
    );
    wait_for(&remote.render(), "control", |x| x.control_here).await;

    remote.shutdown();
    local.shutdown();
}

#[test]
fn remote_mirrors_a_sector_table() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_remote_mirrors_a_sector_table())
}

#[test]
fn remote_mirrors_a_local_computer() {
    let rt = Runtime::new().unwrap();
    rt.block_on(test_remote_mirrors_a_local_computer())
}
