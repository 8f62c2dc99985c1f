use bytes::Bytes;
use futures::StreamExt;
use small_deploy::{DeployError, Deployment, DeploymentState};
use std::time::Duration;

#[tokio::test]
async fn test_ping_pong_between_custom_services() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();
    let client = deployment.custom_service("client", localhost).unwrap();
    let server = deployment.custom_service("server", localhost).unwrap();

    let ping_out = deployment.sender(client, "ping").unwrap();
    let ping_in = deployment.receiver(server, "ping").unwrap();
    let pong_out = deployment.sender(server, "pong").unwrap();
    let pong_in = deployment.receiver(client, "pong").unwrap();
    deployment.send_to(ping_out, ping_in).unwrap();
    deployment.send_to(pong_out, pong_in).unwrap();

    deployment.deploy().await.unwrap();
    assert_eq!(deployment.state(), DeploymentState::Deployed);
    assert!(deployment.address(ping_in).is_some());
    assert!(deployment.address(pong_in).is_some());

    let mut ping_sink = deployment.server_port(ping_out).unwrap().into_sink().unwrap();
    let mut ping_stream = deployment.server_port(ping_in).unwrap().into_stream().unwrap();
    let mut pong_sink = deployment.server_port(pong_out).unwrap().into_sink().unwrap();
    let mut pong_stream = deployment.server_port(pong_in).unwrap().into_stream().unwrap();

    deployment.start().await.unwrap();

    ping_sink.send("ping").await.unwrap();
    let received = ping_stream.next().await.unwrap().unwrap();
    assert_eq!(received, Bytes::from_static(b"ping"));

    pong_sink.send("pong").await.unwrap();
    let received = pong_stream.next().await.unwrap().unwrap();
    assert_eq!(received, Bytes::from_static(b"pong"));

    // 每個方向恰好一個 payload
    ping_sink.close().await.unwrap();
    pong_sink.close().await.unwrap();
    assert!(ping_stream.next().await.is_none());
    assert!(pong_stream.next().await.is_none());

    deployment.stop().await.unwrap();
    assert_eq!(deployment.state(), DeploymentState::Stopped);
}

#[tokio::test]
async fn test_start_before_deploy_fails() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();
    deployment.custom_service("client", localhost).unwrap();

    let err = deployment.start().await.unwrap_err();
    assert!(matches!(err, DeployError::NotDeployed { .. }));

    let err = deployment.stop().await.unwrap_err();
    assert!(matches!(err, DeployError::NotDeployed { .. }));
    assert_eq!(deployment.state(), DeploymentState::Building);
}

#[tokio::test]
async fn test_repeated_deploy_and_start_fail() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();
    deployment.custom_service("client", localhost).unwrap();

    deployment.deploy().await.unwrap();
    let err = deployment.deploy().await.unwrap_err();
    assert!(matches!(err, DeployError::InvalidState { .. }));

    deployment.start().await.unwrap();
    let err = deployment.start().await.unwrap_err();
    assert!(matches!(err, DeployError::InvalidState { .. }));
    assert_eq!(deployment.state(), DeploymentState::Started);
}

#[tokio::test]
async fn test_managed_sender_waits_for_start() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();
    let greeter = deployment
        .managed_service("greeter", localhost, |mut ports, _stdout| async move {
            let mut output = ports.take_sink("output")?;
            output.send("hello").await?;
            Ok(())
        })
        .unwrap();
    let observer = deployment.custom_service("observer", localhost).unwrap();
    let output = deployment.sender(greeter, "output").unwrap();
    let input = deployment.receiver(observer, "input").unwrap();
    deployment.send_to(output, input).unwrap();

    deployment.deploy().await.unwrap();
    let mut stream = deployment.server_port(input).unwrap().into_stream().unwrap();

    let early = tokio::time::timeout(Duration::from_millis(200), stream.next()).await;
    assert!(early.is_err(), "managed program sent before start()");

    deployment.start().await.unwrap();
    let payload = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(payload, Bytes::from_static(b"hello"));

    // 程式結束後 sender 關閉，stream 跟著結束
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_stdout_subscribed_before_start_sees_all_lines() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();
    let chatty = deployment
        .managed_service("chatty", localhost, |_ports, stdout| async move {
            for n in 0..3 {
                stdout.println(format!("line {}", n));
            }
            Ok(())
        })
        .unwrap();

    assert!(matches!(
        deployment.stdout(chatty),
        Err(DeployError::NotDeployed { .. })
    ));

    deployment.deploy().await.unwrap();
    let first = deployment.stdout(chatty).unwrap();
    let second = deployment.stdout(chatty).unwrap();
    deployment.start().await.unwrap();

    let first: Vec<String> = first.collect().await;
    let second: Vec<String> = second.collect().await;
    assert_eq!(first, vec!["line 0", "line 1", "line 2"]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_remote_host_advertises_configured_address() {
    let mut deployment = Deployment::new();
    let edge = deployment.remote_host("edge", "127.0.0.1", "127.0.0.1").unwrap();
    let client = deployment.custom_service("client", edge).unwrap();
    let server = deployment.custom_service("server", edge).unwrap();
    let out = deployment.sender(client, "out").unwrap();
    let input = deployment.receiver(server, "in").unwrap();
    deployment.send_to(out, input).unwrap();

    deployment.deploy().await.unwrap();
    let address = deployment.address(input).unwrap();
    assert_eq!(address.host, "127.0.0.1");
    assert_eq!(deployment.addresses().len(), 1);
}

#[tokio::test]
async fn test_unbound_ports() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();
    let lonely = deployment.custom_service("lonely", localhost).unwrap();
    let out = deployment.sender(lonely, "out").unwrap();
    let input = deployment.receiver(lonely, "in").unwrap();

    deployment.deploy().await.unwrap();
    assert!(deployment.address(input).is_some());

    let mut sink = deployment.server_port(out).unwrap().into_sink().unwrap();
    sink.send("into the void").await.unwrap();

    let mut stream = deployment.server_port(input).unwrap().into_stream().unwrap();
    assert!(stream.next().await.is_none());
}
