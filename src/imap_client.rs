use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_imap::Session;
use async_native_tls::{TlsConnector, TlsStream};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::config::ImapConfig;
use crate::email::{parse_message, EmailMessage};
use crate::error::{Error, Result};

type ImapSession = Session<TlsStream<Compat<TcpStream>>>;

/// Candidates are always peeked: `\Seen` is only set by `mark_processed`,
/// once the message has been handled, so a cycle that dies halfway through
/// its fetches leaves the remaining messages unseen for the next one.
const FETCH_QUERY: &str = "BODY.PEEK[]";

/// Where the poller gets its candidate messages from
pub trait MailSource: Send {
    /// Messages currently matching the search filter, fully fetched
    fn fetch_candidates<'a>(&'a mut self)
        -> Pin<Box<dyn Future<Output = Result<Vec<EmailMessage>>> + Send + 'a>>;

    /// Flag a handled message so it does not come back on the next cycle
    fn mark_processed<'a>(&'a mut self, uid: u32)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Release the connection on shutdown
    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Run one IMAP step under the configured timeout
async fn bounded<T, F>(timeout: Duration, step: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, fut).await.map_err(|_| {
        Error::Connection(format!("{} timed out after {}s", step, timeout.as_secs()))
    })?
}

/// IMAP search query for unseen messages, narrowed by the optional filters
pub fn search_criteria(config: &ImapConfig) -> String {
    let mut criteria = String::from("UNSEEN");
    if let Some(sender) = &config.sender_filter {
        criteria.push_str(&format!(" FROM {}", quote(sender)));
    }
    if let Some(subject) = &config.subject_filter {
        criteria.push_str(&format!(" SUBJECT {}", quote(subject)));
    }
    criteria
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

pub struct ImapClient {
    session: ImapSession,
    timeout: Duration,
    processed_folder_ready: bool,
}

impl ImapClient {
    pub async fn new(config: &ImapConfig) -> Result<Self> {
        info!("Connecting to IMAP server {}:{}", config.server, config.port);

        let session = bounded(config.timeout, "IMAP connection", Self::login(config)).await?;

        info!("✅ IMAP connection established as {}", config.username);

        Ok(ImapClient {
            session,
            timeout: config.timeout,
            processed_folder_ready: false,
        })
    }

    async fn login(config: &ImapConfig) -> Result<ImapSession> {
        let tcp_stream = TcpStream::connect((config.server.as_str(), config.port))
            .await
            .map_err(|e| Error::Connection(format!("unable to reach {}:{}: {}", config.server, config.port, e)))?;

        let tls = TlsConnector::new();
        let tls_stream = tls
            .connect(&config.server, tcp_stream.compat())
            .await
            .map_err(|e| Error::Connection(format!("TLS handshake failed: {}", e)))?;

        let client = async_imap::Client::new(tls_stream);

        client
            .login(&config.username, &config.password)
            .await
            .map_err(|e| Error::Connection(format!("IMAP authentication failed: {}", e.0)))
    }

    /// UIDs of the messages matching `criteria` in `mailbox`, oldest first
    pub async fn search(&mut self, mailbox: &str, criteria: &str) -> Result<Vec<u32>> {
        let timeout = self.timeout;

        bounded(timeout, "SELECT", async {
            self.session
                .select(mailbox)
                .await
                .map_err(|e| Error::imap(&format!("SELECT {}", mailbox), e))
        })
        .await?;

        debug!("Search criteria: {}", criteria);

        let uids = bounded(timeout, "SEARCH", async {
            self.session
                .uid_search(criteria)
                .await
                .map_err(|e| Error::imap("UID SEARCH", e))
        })
        .await?;

        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        debug!("Found {} message(s) in {}", uids.len(), mailbox);

        Ok(uids)
    }

    /// Fetch and decode one message, leaving its flags untouched
    pub async fn fetch_message(&mut self, uid: u32) -> Result<Option<EmailMessage>> {
        let timeout = self.timeout;

        let fetches = bounded(timeout, "FETCH", async {
            let stream = self
                .session
                .uid_fetch(uid.to_string(), FETCH_QUERY)
                .await
                .map_err(|e| Error::imap("UID FETCH", e))?;
            let fetches: Vec<_> = stream.collect::<Vec<_>>().await;
            Ok::<_, Error>(fetches)
        })
        .await?;

        let mut raw = None;
        for fetch in fetches {
            let fetch = fetch.map_err(|e| Error::imap("UID FETCH", e))?;
            if let Some(body) = fetch.body() {
                raw = Some(body.to_vec());
                break;
            }
        }

        match raw {
            Some(raw) => {
                debug!("Message UID {} fetched, {} bytes", uid, raw.len());
                Ok(Some(parse_message(uid, &raw)))
            }
            None => {
                warn!("Message UID {} vanished or has no body", uid);
                Ok(None)
            }
        }
    }

    /// Create the folder when it does not exist yet
    pub async fn ensure_folder_exists(&mut self, folder_name: &str) -> Result<()> {
        debug!("Checking that folder {} exists", folder_name);
        let timeout = self.timeout;

        let exists = bounded(timeout, "LIST", async {
            let stream = self
                .session
                .list(None, Some(folder_name))
                .await
                .map_err(|e| Error::imap("LIST", e))?;
            let names: Vec<_> = stream
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .filter_map(|r| r.ok())
                .collect();
            Ok::<_, Error>(!names.is_empty())
        })
        .await?;

        if !exists {
            info!("Creating IMAP folder {}", folder_name);
            bounded(timeout, "CREATE", async {
                self.session
                    .create(folder_name)
                    .await
                    .map_err(|e| Error::imap(&format!("CREATE {}", folder_name), e))
            })
            .await?;
        }

        Ok(())
    }

    /// Flag the message `\Seen \Answered`, then move it to `processed_folder`.
    ///
    /// Only the flagging can fail the call, a failed move is logged and the
    /// message stays where it is.
    pub async fn mark_processed(&mut self, uid: u32, processed_folder: Option<&str>) -> Result<()> {
        let timeout = self.timeout;
        let uid_set = uid.to_string();

        bounded(timeout, "STORE", async {
            let stream = self
                .session
                .uid_store(&uid_set, "+FLAGS (\\Seen \\Answered)")
                .await
                .map_err(|e| Error::imap("UID STORE", e))?;
            // The stream must be drained for the command to complete
            let _results: Vec<_> = stream.collect::<Vec<_>>().await;
            Ok::<_, Error>(())
        })
        .await?;

        if let Some(folder) = processed_folder {
            if let Err(e) = self.move_to_folder(&uid_set, folder).await {
                warn!("⚠️  Unable to move message UID {} to {}: {}", uid, folder, e);
            }
        }

        debug!("Message UID {} marked as processed", uid);
        Ok(())
    }

    async fn move_to_folder(&mut self, uid_set: &str, folder: &str) -> Result<()> {
        if !self.processed_folder_ready {
            self.ensure_folder_exists(folder).await?;
            self.processed_folder_ready = true;
        }

        let timeout = self.timeout;
        bounded(timeout, "MOVE", async {
            self.session
                .uid_copy(uid_set, folder)
                .await
                .map_err(|e| Error::imap(&format!("UID COPY {}", folder), e))?;

            let stream = self
                .session
                .uid_store(uid_set, "+FLAGS (\\Deleted)")
                .await
                .map_err(|e| Error::imap("UID STORE", e))?;
            let _results: Vec<_> = stream.collect::<Vec<_>>().await;

            let stream = self
                .session
                .expunge()
                .await
                .map_err(|e| Error::imap("EXPUNGE", e))?;
            let _expunged: Vec<_> = stream.collect::<Vec<_>>().await;
            Ok::<_, Error>(())
        })
        .await
    }

    pub async fn logout(mut self) -> Result<()> {
        info!("Logging out from IMAP server");
        let timeout = self.timeout;
        bounded(timeout, "LOGOUT", async {
            self.session
                .logout()
                .await
                .map_err(|e| Error::imap("LOGOUT", e))
        })
        .await
    }
}

/// IMAP-backed mail source that keeps its session between cycles.
///
/// Any connection or protocol error drops the session. Only the fetch at the
/// start of a cycle reconnects, since it is also what selects the mailbox.
pub struct ImapMailbox {
    config: ImapConfig,
    client: Option<ImapClient>,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        ImapMailbox { config, client: None }
    }

    async fn connect(&mut self) -> Result<&mut ImapClient> {
        if self.client.is_none() {
            self.client = Some(ImapClient::new(&self.config).await?);
        }
        self.client
            .as_mut()
            .ok_or_else(|| Error::Connection("IMAP session unavailable".to_string()))
    }

    async fn fetch_all(&mut self) -> Result<Vec<EmailMessage>> {
        let criteria = search_criteria(&self.config);
        let mailbox = self.config.mailbox.clone();

        let client = self.connect().await?;
        let uids = client.search(&mailbox, &criteria).await?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        info!("📬 {} candidate message(s) in {}", uids.len(), mailbox);

        let mut messages = Vec::with_capacity(uids.len());
        for uid in uids {
            if let Some(message) = client.fetch_message(uid).await? {
                messages.push(message);
            }
        }

        Ok(messages)
    }

    async fn mark(&mut self, uid: u32) -> Result<()> {
        let folder = self.config.processed_folder.clone();
        // No reconnect here: a fresh session has no mailbox selected. The
        // message stays unseen and comes back on the next cycle.
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| Error::Connection(format!("no open IMAP session to mark UID {}", uid)))?;
        client.mark_processed(uid, folder.as_deref()).await
    }

    fn drop_session_on<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.invalidates_session() && self.client.take().is_some() {
                warn!("Dropping IMAP session after error: {}", e);
            }
        }
        result
    }
}

impl MailSource for ImapMailbox {
    fn fetch_candidates<'a>(&'a mut self)
        -> Pin<Box<dyn Future<Output = Result<Vec<EmailMessage>>> + Send + 'a>> {
        Box::pin(async move {
            let result = self.fetch_all().await;
            self.drop_session_on(result)
        })
    }

    fn mark_processed<'a>(&'a mut self, uid: u32)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let result = self.mark(uid).await;
            self.drop_session_on(result)
        })
    }

    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if let Some(client) = self.client.take() {
                if let Err(e) = client.logout().await {
                    warn!("IMAP logout failed: {}", e);
                }
            }
        })
    }
}
