#![cfg(unix)]

use std::path::PathBuf;
use std::time::Duration;

use may::os::unix::net::UnixStream;
use may_stream_rpc::service::{demo_table, BIDIRECTIONAL_STREAMING, SIMPLE_RPC};
use may_stream_rpc::{Dispatcher, Message, RpcClient, UdsServer};

fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("may_stream_rpc_{}_{}.sock", name, std::process::id()))
}

#[test]
fn calls_over_unix_socket() {
    let _ = env_logger::try_init();
    let path = socket_path("calls");
    let server = Dispatcher::new(demo_table().unwrap()).start(&path).unwrap();
    assert!(server.local_addr().is_none());
    assert!(path.exists());

    let stream = UnixStream::connect(&path).unwrap();
    let mut client = RpcClient::new(stream).unwrap();
    client.set_timeout(Duration::from_secs(5));

    let rsp = client
        .unary(SIMPLE_RPC, &Message::new("uds", 41, false, 2.0))
        .unwrap();
    assert_eq!(rsp, Message::new("response uds", 42, true, 2.5));

    let mut call = client.open(BIDIRECTIONAL_STREAMING).unwrap();
    for i in 0..3 {
        call.send(&Message::new("b", i, true, 0.0)).unwrap();
        assert_eq!(call.recv().unwrap().unwrap().integer, i + 1);
    }
    call.close_send().unwrap();
    assert_eq!(call.recv().unwrap(), None);
    assert!(call.status().unwrap().is_ok());

    // the client is still connected while the server stops
    server.shutdown();
    assert!(!path.exists());
    assert!(UnixStream::connect(&path).is_err());
}
