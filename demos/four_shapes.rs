use std::time::Duration;

use may_stream_rpc::service::{
    demo_table, BIDIRECTIONAL_STREAMING, CLIENT_SIDE_STREAMING, SERVER_SIDE_STREAMING, SIMPLE_RPC,
};
use may_stream_rpc::{Config, Dispatcher, Message, RpcClient, TcpServer};

fn main() {
    env_logger::init();
    let config = Config::default().workers(2).timeout(Duration::from_secs(5));
    config.apply_scheduler();

    let addr = ("127.0.0.1", 4000);
    let _server = Dispatcher::new(demo_table().unwrap())
        .start_with(addr, config.clone())
        .unwrap();

    let stream = may::net::TcpStream::connect(addr).unwrap();
    let client = RpcClient::with_config(stream, &config).unwrap();

    let req = Message::new("hello", 1, true, 1.0);
    println!("unary: {:?}", client.unary(SIMPLE_RPC, &req));
    println!(
        "server streaming: {:?}",
        client.server_streaming(SERVER_SIDE_STREAMING, &req)
    );

    let reqs = (0..3).map(|i| Message::new(format!("req {i}"), i, false, 0.0));
    println!(
        "client streaming: {:?}",
        client.client_streaming(CLIENT_SIDE_STREAMING, reqs)
    );

    let mut call = client.open(BIDIRECTIONAL_STREAMING).unwrap();
    for i in 0..3 {
        call.send(&Message::new(format!("ping {i}"), i, true, 0.0))
            .unwrap();
        println!("bidirectional: {:?}", call.recv());
    }
    call.close_send().unwrap();
    println!("bidirectional: {:?}", call.recv());
    println!("status: {:?}", call.status());

    // cancel half way through
    let mut call = client.open(BIDIRECTIONAL_STREAMING).unwrap();
    for i in 0..5 {
        if i == 2 {
            call.cancel().unwrap();
            break;
        }
        call.send(&Message::new(format!("ping {i}"), i, true, 0.0))
            .unwrap();
        println!("bidirectional: {:?}", call.recv());
    }
    println!("after cancel: {:?}", call.recv());

    println!("unknown method: {:?}", client.unary("noSuchMethod", &req));
}
