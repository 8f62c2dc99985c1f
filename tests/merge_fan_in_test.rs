use bytes::Bytes;
use futures::StreamExt;
use small_deploy::{DeployError, Deployment};
use std::collections::HashMap;
use std::time::Duration;

async fn next_line(lines: &mut small_deploy::LineStream) -> String {
    tokio::time::timeout(Duration::from_secs(5), lines.next())
        .await
        .expect("timed out waiting for stdout")
        .expect("stdout ended early")
}

#[tokio::test]
async fn test_two_clients_merge_into_echo() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();

    let echo = deployment
        .managed_service("echo", localhost, |mut ports, stdout| async move {
            let mut input = ports.take_stream("input")?;
            while let Some(payload) = input.next().await {
                stdout.println(format!("echo {:?}", String::from_utf8_lossy(&payload?)));
            }
            Ok(())
        })
        .unwrap();
    let input = deployment.receiver(echo, "input").unwrap();
    let input = deployment.merge(input).unwrap();

    let client = deployment.custom_service("client", localhost).unwrap();
    let first = deployment.client_port(client).unwrap();
    let second = deployment.client_port(client).unwrap();
    deployment.send_to(first, input).unwrap();
    deployment.send_to(second, input).unwrap();

    deployment.deploy().await.unwrap();
    let mut first = deployment.server_port(first).unwrap().into_sink().unwrap();
    let mut second = deployment.server_port(second).unwrap().into_sink().unwrap();
    let mut stdout = deployment.stdout(echo).unwrap();
    deployment.start().await.unwrap();

    first.send("hi 1!").await.unwrap();
    assert_eq!(next_line(&mut stdout).await, "echo \"hi 1!\"");

    second.send("hi 2!").await.unwrap();
    assert_eq!(next_line(&mut stdout).await, "echo \"hi 2!\"");

    deployment.stop().await.unwrap();
}

#[tokio::test]
async fn test_merge_preserves_per_sender_order() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();
    let producers = deployment.custom_service("producers", localhost).unwrap();
    let consumer = deployment.custom_service("consumer", localhost).unwrap();

    let left = deployment.sender(producers, "left").unwrap();
    let right = deployment.sender(producers, "right").unwrap();
    let input = deployment.receiver(consumer, "input").unwrap();
    deployment.merge(input).unwrap();
    deployment.send_to(left, input).unwrap();
    deployment.send_to(right, input).unwrap();

    deployment.deploy().await.unwrap();
    let mut left_sink = deployment.server_port(left).unwrap().into_sink().unwrap();
    let mut right_sink = deployment.server_port(right).unwrap().into_sink().unwrap();
    let stream = deployment.server_port(input).unwrap().into_stream().unwrap();
    assert_eq!(stream.live_senders(), 2);

    let produce = async move {
        for n in 0..50u32 {
            left_sink.send(format!("{}", n)).await?;
            right_sink.send(format!("{}", n)).await?;
        }
        left_sink.close().await?;
        right_sink.close().await?;
        Ok::<_, DeployError>(())
    };
    let consume = stream.into_tagged().collect::<Vec<_>>();
    let (produced, received) = tokio::join!(produce, consume);
    produced.unwrap();

    let mut per_sender: HashMap<_, Vec<u32>> = HashMap::new();
    for item in received {
        let (sender, payload) = item.unwrap();
        let n = String::from_utf8_lossy(&payload).parse().unwrap();
        per_sender.entry(sender).or_default().push(n);
    }

    let expected: Vec<u32> = (0..50).collect();
    assert_eq!(per_sender.len(), 2);
    assert_eq!(per_sender[&left], expected);
    assert_eq!(per_sender[&right], expected);
}

#[tokio::test]
async fn test_second_binding_requires_merge() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();
    let a = deployment.custom_service("a", localhost).unwrap();
    let b = deployment.custom_service("b", localhost).unwrap();
    let first = deployment.sender(a, "first").unwrap();
    let second = deployment.sender(a, "second").unwrap();
    let input = deployment.receiver(b, "input").unwrap();

    deployment.send_to(first, input).unwrap();
    let err = deployment.send_to(second, input).unwrap_err();
    assert!(matches!(err, DeployError::CardinalityViolation { .. }));

    // 事後標記 merge 也可以
    deployment.merge(input).unwrap();
    assert!(deployment.send_to(second, input).is_ok());
}

#[tokio::test]
async fn test_fan_out_delivers_to_every_receiver() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();
    let source = deployment.custom_service("source", localhost).unwrap();
    let east = deployment.custom_service("east", localhost).unwrap();
    let west = deployment.custom_service("west", localhost).unwrap();

    let out = deployment.sender(source, "out").unwrap();
    let out = deployment.fan_out(out).unwrap();
    let east_in = deployment.receiver(east, "in").unwrap();
    let west_in = deployment.receiver(west, "in").unwrap();
    deployment.send_to(out, east_in).unwrap();
    deployment.send_to(out, west_in).unwrap();

    deployment.deploy().await.unwrap();
    let handle = deployment.server_port(out).unwrap();
    assert_eq!(handle.addresses().len(), 2);
    let mut sink = handle.into_sink().unwrap();
    let mut east_stream = deployment.server_port(east_in).unwrap().into_stream().unwrap();
    let mut west_stream = deployment.server_port(west_in).unwrap().into_stream().unwrap();

    sink.send("broadcast").await.unwrap();
    assert_eq!(
        east_stream.next().await.unwrap().unwrap(),
        Bytes::from_static(b"broadcast")
    );
    assert_eq!(
        west_stream.next().await.unwrap().unwrap(),
        Bytes::from_static(b"broadcast")
    );
}

#[tokio::test]
async fn test_merge_stream_ends_after_all_senders_close() {
    let mut deployment = Deployment::new();
    let localhost = deployment.localhost().unwrap();
    let clients = deployment.custom_service("clients", localhost).unwrap();
    let server = deployment.custom_service("server", localhost).unwrap();
    let a = deployment.client_port(clients).unwrap();
    let b = deployment.client_port(clients).unwrap();
    let input = deployment.receiver(server, "input").unwrap();
    deployment.merge(input).unwrap();
    deployment.send_to(a, input).unwrap();
    deployment.send_to(b, input).unwrap();

    deployment.deploy().await.unwrap();
    let a = deployment.server_port(a).unwrap().into_sink().unwrap();
    let mut b = deployment.server_port(b).unwrap().into_sink().unwrap();
    let mut stream = deployment.server_port(input).unwrap().into_stream().unwrap();

    a.close().await.unwrap();
    b.send("last").await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"last"));

    drop(b);
    assert!(stream.next().await.is_none());
}
