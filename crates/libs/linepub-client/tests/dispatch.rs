use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use linepub_client::frame::MAX_PENDING_BYTES;
use linepub_client::{handler_fn, Client, ClientConfig, Message, MessageHandler};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();
}

async fn connected_pair() -> (Arc<Client>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let client = Arc::new(Client::new(ClientConfig::new("127.0.0.1", port)));
    let (connected, accepted) = tokio::join!(client.connect(), listener.accept());
    connected.expect("connect");
    let (server, _) = accepted.expect("accept");
    (client, server)
}

/// Feeds `chunks` to the client one write at a time, then hangs up and waits
/// for the receive loop to finish.
async fn feed(client: &Client, mut server: TcpStream, chunks: &[&[u8]]) {
    let writer = async move {
        for chunk in chunks {
            server.write_all(chunk).await.expect("write");
            server.flush().await.expect("flush");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    let both = async { tokio::join!(client.run(), writer) };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(5), both)
        .await
        .expect("receive loop did not finish");
    result.expect("receive loop");
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

#[tokio::test]
async fn payload_keeps_embedded_spaces() {
    init_logging();
    let (client, server) = connected_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.subscribe("sensors/temp", tx).expect("subscribe");

    feed(&client, server, &[b"pub sensors/temp 23 C outside\n"]).await;

    assert_eq!(drain(&mut rx), vec![Message::new("sensors/temp", "23 C outside")]);
}

#[tokio::test]
async fn handlers_run_in_registration_order_once_each() {
    init_logging();
    let (client, server) = connected_pair().await;
    let calls = Arc::new(Mutex::new(Vec::new()));
    for name in ["h1", "h2"] {
        let calls = calls.clone();
        client.subscribe(
            "arduino/out/status",
            handler_fn(move |message: Message| {
                let calls = calls.clone();
                async move {
                    calls.lock().unwrap().push(format!("{name} {}", message.payload));
                    anyhow::Ok(())
                }
            }),
        )
        .expect("subscribe");
    }

    feed(&client, server, &[b"pub arduino/out/status ok\n"]).await;

    assert_eq!(*calls.lock().unwrap(), vec!["h1 ok", "h2 ok"]);
}

#[tokio::test]
async fn malformed_lines_trigger_nothing() {
    init_logging();
    let (client, server) = connected_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.subscribe("sensors/temp", tx.clone()).expect("subscribe");
    client.subscribe("topicX", tx).expect("subscribe");

    feed(
        &client,
        server,
        &[
            b"pub sensors/temp\n",
            b"nope topicX hello\n",
            b"\n   \n",
            b"sub topicX hi\n",
            b"pub topicX ok\n",
        ],
    )
    .await;

    assert_eq!(drain(&mut rx), vec![Message::new("topicX", "ok")]);
}

#[tokio::test]
async fn frame_split_across_reads_dispatches_once() {
    init_logging();
    let (client, server) = connected_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.subscribe("a/b", tx).expect("subscribe");

    feed(&client, server, &[b"pub a/b hel", b"lo\n"]).await;

    assert_eq!(drain(&mut rx), vec![Message::new("a/b", "hello")]);
}

#[tokio::test]
async fn multibyte_text_split_across_reads_survives() {
    init_logging();
    let (client, server) = connected_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.subscribe("greeting", tx).expect("subscribe");

    let line = "pub greeting grüße\n".as_bytes();
    let split = line.iter().position(|&b| b == 0xc3).expect("multibyte char") + 1;
    feed(&client, server, &[&line[..split], &line[split..], b"pub greeting \xff\xfe\n"]).await;

    assert_eq!(drain(&mut rx), vec![Message::new("greeting", "grüße")]);
}

#[tokio::test]
async fn unsubscribed_topics_are_ignored() {
    init_logging();
    let (client, server) = connected_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.subscribe("sensors/temp", tx).expect("subscribe");

    let frames = b"pub sensors/humidity 40\npub sensors/temp/inner 1\npub sensors/temp 21\n";
    feed(&client, server, &[frames]).await;

    assert_eq!(drain(&mut rx), vec![Message::new("sensors/temp", "21")]);
}

struct Exploding;

#[async_trait]
impl MessageHandler for Exploding {
    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        if message.payload == "panic" {
            panic!("handler bug");
        }
        anyhow::bail!("cannot handle {}", message.payload)
    }
}

#[tokio::test]
async fn failing_handlers_do_not_stop_the_loop() {
    init_logging();
    let (client, server) = connected_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.subscribe("t", Exploding).expect("subscribe");
    client.subscribe("t", tx).expect("subscribe");

    feed(&client, server, &[b"pub t panic\n", b"pub t error\n", b"pub t fine\n"]).await;

    assert_eq!(
        drain(&mut rx),
        vec![Message::new("t", "panic"), Message::new("t", "error"), Message::new("t", "fine")]
    );
}

#[tokio::test]
async fn handler_replies_through_publisher() {
    init_logging();
    let (client, server) = connected_pair().await;
    let publisher = client.publisher();
    client.subscribe(
        "arduino/out/checkup",
        handler_fn(move |_message: Message| {
            let publisher = publisher.clone();
            async move {
                publisher.publish("computer/out/checkup", "{}").await?;
                anyhow::Ok(())
            }
        }),
    )
    .expect("subscribe");

    let loop_task = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    let (read_half, mut write_half) = server.into_split();
    write_half.write_all(b"pub arduino/out/checkup {\"uptime\": 12}\n").await.expect("write");

    let mut lines = BufReader::new(read_half).lines();
    let reply = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("no reply")
        .expect("read")
        .expect("line");
    assert_eq!(reply, "pub computer/out/checkup {}");

    client.close();
    let result = tokio::time::timeout(Duration::from_secs(5), loop_task)
        .await
        .expect("loop did not stop")
        .expect("join");
    assert!(result.is_ok());
}

#[tokio::test]
async fn handlers_added_while_running_see_later_frames() {
    init_logging();
    let (client, server) = connected_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscriber = {
        let client = client.clone();
        let tx = tx.clone();
        handler_fn(move |_message: Message| {
            let client = client.clone();
            let tx = tx.clone();
            async move {
                client.subscribe("late", tx)?;
                anyhow::Ok(())
            }
        })
    };
    client.subscribe("register", subscriber).expect("subscribe");

    feed(&client, server, &[b"pub late early\n", b"pub register now\n", b"pub late after\n"]).await;

    assert_eq!(drain(&mut rx), vec![Message::new("late", "after")]);
}

#[tokio::test]
async fn runaway_line_is_dropped_and_reading_resumes() {
    init_logging();
    let (client, server) = connected_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.subscribe("t", tx).expect("subscribe");

    let mut runaway = b"pub t ".to_vec();
    runaway.resize(runaway.len() + MAX_PENDING_BYTES + 4096, b'x');
    feed(&client, server, &[b"pub t before\n", &runaway, b"\npub t ok\n"]).await;

    assert_eq!(
        drain(&mut rx),
        vec![Message::new("t", "before"), Message::new("t", "ok")]
    );
}
