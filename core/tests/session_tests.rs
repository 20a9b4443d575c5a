//! End-to-end session tests over an in-memory stream

use jayk_core::*;
use std::collections::BTreeSet;
use std::time::Duration;
use jayk_core::session::MAX_LINE_LENGTH;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

struct Echo {
    rooms: BTreeSet<String>,
}

impl Module for Echo {
    fn name(&self) -> &str {
        "Echo"
    }

    fn rooms(&self) -> &BTreeSet<String> {
        &self.rooms
    }

    fn set_rooms(&mut self, rooms: BTreeSet<String>) {
        self.rooms = rooms;
    }

    fn commands(&self) -> Vec<&str> {
        vec!["!echo"]
    }

    fn on_command(&mut self, ctx: &Context<'_>) -> Result<()> {
        ctx.say(ctx.args());
        Ok(())
    }
}

fn echo(params: &ModuleParams) -> Result<Box<dyn Module>> {
    Ok(Box::new(Echo {
        rooms: params.rooms.clone(),
    }))
}

fn server() -> ServerConfig {
    BotConfig::from_toml(
        r##"
[[servers]]
server = "irc.example.net"
nicks = ["bot"]
user = "jayk"

[servers.modules.echo]
rooms = ["#x"]
"##,
    )
    .unwrap()
    .servers
    .remove(0)
}

/// The server's end of the pipe
struct FakeServer {
    lines: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    async fn expect(&mut self, expected: &str) {
        let mut line = String::new();
        tokio::time::timeout(Duration::from_secs(5), self.lines.read_line(&mut line))
            .await
            .expect("timed out waiting for the bot")
            .unwrap();
        assert_eq!(line.trim_end(), expected);
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(format!("{}\r\n", line).as_bytes()).await.unwrap();
    }
}

fn start() -> (
    FakeServer,
    mpsc::UnboundedSender<Control>,
    tokio::task::JoinHandle<Result<()>>,
) {
    start_with_buffer(4096)
}

/// Start a session over a pipe holding at most `size` bytes each way
fn start_with_buffer(
    size: usize,
) -> (
    FakeServer,
    mpsc::UnboundedSender<Control>,
    tokio::task::JoinHandle<Result<()>>,
) {
    let (bot_end, server_end) = tokio::io::duplex(size);
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let session = Session::new(&server(), ModuleCatalog::new().with("echo", echo), control_rx).unwrap();
    let task = tokio::spawn(session.run_on(Box::new(bot_end)));

    let (read, writer) = tokio::io::split(server_end);
    let fake = FakeServer {
        lines: BufReader::new(read),
        writer,
    };
    (fake, control_tx, task)
}

#[tokio::test]
async fn test_session_round_trip() {
    let (mut server, control, task) = start();

    server.expect("USER jayk 0 * :Chatbot").await;
    server.expect("NICK bot").await;
    server.send(":irc.example.net 001 bot :Welcome").await;
    server.expect("JOIN #x").await;
    server.send(":bot!jayk@host JOIN #x").await;

    server.send("PING :abc123").await;
    server.expect("PONG :abc123").await;

    server.send(":alice!alice@example.org PRIVMSG #x :!echo hello there").await;
    server.expect("PRIVMSG #x :hello there").await;

    control.send(Control::Shutdown).unwrap();
    server.expect("QUIT :Shutting down").await;
    assert!(task.await.unwrap().is_ok());
}

async fn register(server: &mut FakeServer) {
    server.expect("USER jayk 0 * :Chatbot").await;
    server.expect("NICK bot").await;
    server.send(":irc.example.net 001 bot :Welcome").await;
    server.expect("JOIN #x").await;
    server.send(":bot!jayk@host JOIN #x").await;
}

#[tokio::test]
async fn test_overlong_line_dropped_through_its_newline() {
    let (mut server, control, task) = start();
    register(&mut server).await;

    // The tail after the cut would otherwise read as a command of its own
    let junk = "x".repeat(MAX_LINE_LENGTH);
    server.send(&format!("{}PING :tail", junk)).await;
    server.send("PING :after").await;
    server.expect("PONG :after").await;

    control.send(Control::Shutdown).unwrap();
    server.expect("QUIT :Shutting down").await;
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_line_at_limit_is_accepted() {
    let (mut server, control, task) = start();
    register(&mut server).await;

    let token = "t".repeat(MAX_LINE_LENGTH - "PING :\r\n".len());
    server.send(&format!("PING :{}", token)).await;
    server.expect(&format!("PONG :{}", token)).await;

    control.send(Control::Shutdown).unwrap();
    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_stalled_writer_stopped_on_shutdown() {
    let (mut server, control, task) = start_with_buffer(256);
    register(&mut server).await;

    // A reply larger than the pipe blocks the writer while nobody reads
    let payload = "a".repeat(400);
    server.send(&format!(":alice!alice@example.org PRIVMSG #x :!echo {}", payload)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    control.send(Control::Shutdown).unwrap();
    assert!(task.await.unwrap().is_ok());

    // The writer was aborted, so the pipe closes without the queued QUIT
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), server.lines.read_to_end(&mut rest))
        .await
        .expect("pipe left open by a detached writer")
        .unwrap();
    assert!(!String::from_utf8_lossy(&rest).contains("QUIT"));
}

#[tokio::test]
async fn test_server_close_ends_session() {
    let (mut server, _control, task) = start();
    server.expect("USER jayk 0 * :Chatbot").await;
    drop(server);

    assert!(task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_exhausted_nicks_end_session_with_error() {
    let (mut server, _control, task) = start();
    server.expect("USER jayk 0 * :Chatbot").await;
    server.expect("NICK bot").await;
    server.send(":irc.example.net 433 * bot :Nickname is already in use").await;

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::NoMoreNicks { .. }));
}

#[tokio::test]
async fn test_reconfigure_joins_new_room() {
    let (mut server, control, task) = start();
    server.expect("USER jayk 0 * :Chatbot").await;
    server.expect("NICK bot").await;
    server.send(":irc.example.net 001 bot :Welcome").await;
    server.expect("JOIN #x").await;
    server.send(":bot!jayk@host JOIN #x").await;

    let updated = server_config_with_rooms(&["#x", "#y"]);
    control.send(Control::Reconfigure(updated)).unwrap();
    server.expect("JOIN #y").await;

    control.send(Control::Shutdown).unwrap();
    server.expect("QUIT :Shutting down").await;
    task.await.unwrap().unwrap();
}

fn server_config_with_rooms(rooms: &[&str]) -> ServerConfig {
    let mut config = server();
    if let Some(module) = config.modules.get_mut("echo") {
        module.rooms = rooms.iter().map(|r| r.to_string()).collect();
    }
    config
}
