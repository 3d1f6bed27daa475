use log::debug;
use mailin_embedded::{Handler, Server, SslConfig};
use std::{
    net::{IpAddr, TcpStream},
    sync::Once,
    time::{Duration, Instant},
};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::timeout,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct SmtpHandler(Vec<u8>, UnboundedSender<String>);

impl Handler for SmtpHandler {
    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        debug!("Got data:\n{}", String::from_utf8_lossy(buf));
        self.0.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        let content = String::from_utf8_lossy(&self.0).into_owned();
        self.0.clear();
        let _ = self.1.send(content);
        mailin_embedded::response::OK
    }

    fn auth_plain(
        &mut self,
        authorization_id: &str,
        authentication_id: &str,
        password: &str,
    ) -> mailin_embedded::Response {
        debug!("Got authentication data {authorization_id}, {authentication_id}, {password}");
        mailin_embedded::response::AUTH_OK
    }
}

/// An SMTP server on [`SMTP_PORT`] which accepts every message and hands its raw content to the
/// test in delivery order.
pub struct FakeSmtpServer(
    std::sync::Mutex<Option<Server<SmtpHandler>>>,
    tokio::sync::Mutex<UnboundedReceiver<String>>,
);

impl FakeSmtpServer {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handler = SmtpHandler(Vec::new(), sender);
        let mut server = Server::new(handler);
        server
            .with_name("screentime.example")
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_addr(format!("127.0.0.1:{SMTP_PORT}"))
            .unwrap();
        Self(
            std::sync::Mutex::new(Some(server)),
            tokio::sync::Mutex::new(receiver),
        )
    }

    /// Starts serving on a background thread and returns once the server accepts connections.
    /// Later calls do nothing.
    pub fn start(&self) {
        let mut guard = self.0.lock().unwrap();
        if let Some(server) = guard.take() {
            std::thread::spawn(move || {
                let _ = server.serve();
            });
            wait_until_listening(SMTP_PORT);
        }
    }

    pub async fn next_mail_content(&self) -> Option<String> {
        self.1.lock().await.recv().await
    }

    /// Waits for the next message, giving up after `wait`.
    pub async fn next_mail_content_within(&self, wait: Duration) -> Option<String> {
        timeout(wait, self.next_mail_content()).await.ok().flatten()
    }

    /// Discards messages left over from earlier tests.
    pub async fn flush(&self) {
        let mut receiver = self.1.lock().await;
        while receiver.try_recv().is_ok() {}
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct PoisonedSmtpHandler;

impl Handler for PoisonedSmtpHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::NO_SERVICE
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// Starts an SMTP server on [`POISONED_SMTP_PORT`] which refuses every session at the greeting.
/// Returns once the server accepts connections; later calls do nothing.
pub fn start_poisoned_smtp_server() {
    static STARTED: Once = Once::new();
    STARTED.call_once(|| {
        let handler = PoisonedSmtpHandler;
        let mut server = Server::new(handler);
        server
            .with_name("screentime.example")
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_addr(format!("127.0.0.1:{POISONED_SMTP_PORT}"))
            .unwrap();
        std::thread::spawn(move || {
            let _ = server.serve();
        });
        wait_until_listening(POISONED_SMTP_PORT);
    });
}

fn wait_until_listening(port: u16) {
    let deadline = Instant::now() + STARTUP_TIMEOUT;
    while TcpStream::connect(("127.0.0.1", port)).is_err() {
        if Instant::now() > deadline {
            panic!("SMTP server on port {port} did not start within {STARTUP_TIMEOUT:?}");
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}
