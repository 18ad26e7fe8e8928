//! PostgreSQL session
//!
//! Thin wrapper over a tokio-postgres client: connect, run statements, and
//! send server-side cancel requests. Errors are classified into [`DbError`]
//! so callers can tell a cancellation from a timeout or a broken connection.

use crate::config::{ConnectionConfig, SslMode};
use crate::error::{DbError, DbResult};
use tokio_postgres::error::SqlState;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Socket};

/// An open connection to the fixture database
pub struct PostgresSession {
    client: Client,
    /// Sends cancel requests for whatever this session is running
    canceller: QueryCanceller,
}

/// Owned handle for cancelling the statement running on one session.
///
/// Cancelling goes over a fresh connection, so it works while the session's
/// client is busy awaiting the statement.
#[derive(Clone)]
pub struct QueryCanceller {
    token: tokio_postgres::CancelToken,
    /// Cancel requests go over the same transport as the session
    ssl_mode: SslMode,
}

impl PostgresSession {
    /// Connect to the database described by `config`.
    ///
    /// The background connection task logs if the link drops; statements
    /// issued afterwards fail with [`DbError::ConnectionFailed`].
    pub async fn connect(config: &ConnectionConfig) -> DbResult<Self> {
        let conn_string = config.to_libpq();
        // connect_timeout in the string only covers the TCP connect; a server
        // that accepts and never answers the startup packet needs this bound
        let handshake = async {
            match config.ssl_mode {
                SslMode::Disable => open(&conn_string, tokio_postgres::NoTls).await,
                SslMode::Prefer | SslMode::Require => {
                    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(make_tls_config());
                    open(&conn_string, tls).await
                }
            }
        };
        let client = tokio::time::timeout(config.connect_timeout, handshake)
            .await
            .map_err(|_| {
                DbError::ConnectionFailed(format!(
                    "No response from {} within {:?}",
                    config, config.connect_timeout
                ))
            })??;

        // Untranslated server messages; needs superuser, so a refusal is only logged
        if let Err(e) = client.batch_execute("SET lc_messages = 'C'").await {
            tracing::debug!(error = %e, "Could not set lc_messages for session");
        }

        if let Some(timeout) = config.statement_timeout {
            client
                .batch_execute(&format!("SET statement_timeout = {}", timeout.as_millis()))
                .await
                .map_err(|e| classify(&e))?;
        }

        let canceller = QueryCanceller {
            token: client.cancel_token(),
            ssl_mode: config.ssl_mode,
        };

        Ok(Self { client, canceller })
    }

    pub fn canceller(&self) -> QueryCanceller {
        self.canceller.clone()
    }

    /// Execute one statement, returning the number of rows affected
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> DbResult<u64> {
        self.client
            .execute(sql, params)
            .await
            .map_err(|e| classify(&e))
    }

    /// Execute a script of one or more statements, without parameters
    pub async fn batch_execute(&self, script: &str) -> DbResult<()> {
        self.client
            .batch_execute(script)
            .await
            .map_err(|e| classify(&e))
    }

    /// Run a query returning a single integer (e.g. `count(*)`)
    pub async fn query_i64(&self, sql: &str) -> DbResult<i64> {
        let row = self
            .client
            .query_one(sql, &[])
            .await
            .map_err(|e| classify(&e))?;
        row.try_get::<_, i64>(0)
            .map_err(|e| DbError::query(format!("Expected a bigint result: {}", e)))
    }

    /// Lightweight liveness check
    pub async fn ping(&self) -> DbResult<()> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }
}

impl QueryCanceller {
    /// Send a cancel request for the currently running statement.
    pub async fn cancel(&self) -> DbResult<()> {
        match self.ssl_mode {
            SslMode::Disable => self.token.cancel_query(tokio_postgres::NoTls).await,
            SslMode::Prefer | SslMode::Require => {
                let tls = tokio_postgres_rustls::MakeRustlsConnect::new(make_tls_config());
                self.token.cancel_query(tls).await
            }
        }
        .map_err(|e| DbError::ConnectionFailed(format!("Cancel failed: {}", e)))
    }
}

/// Connect and drive the connection on a background task
async fn open<T>(conn_string: &str, tls: T) -> DbResult<Client>
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let (client, connection) = tokio_postgres::connect(conn_string, tls)
        .await
        .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(error = %e, "Connection lost");
        }
    });
    Ok(client)
}

fn make_tls_config() -> rustls::ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    let mut loaded = 0;
    for cert in native_certs.certs {
        if root_store.add(cert).is_ok() {
            loaded += 1;
        }
    }
    if loaded == 0 {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// Map a driver error onto the harness taxonomy.
pub(crate) fn classify(err: &tokio_postgres::Error) -> DbError {
    if let Some(db_err) = err.as_db_error() {
        return classify_server_error(db_err.code(), db_err.message());
    }
    if err.is_closed() || source_is_io(err) {
        return DbError::ConnectionFailed(err.to_string());
    }
    DbError::query(err.to_string())
}

fn source_is_io(err: &tokio_postgres::Error) -> bool {
    std::error::Error::source(err).is_some_and(|s| s.downcast_ref::<std::io::Error>().is_some())
}

/// Classify an error the server reported.
///
/// `57014` covers both a statement timeout and an explicit cancel request.
/// Sessions ask for untranslated messages, which lets the timeout be told
/// apart here; everything else stays a query error until the caller decides
/// (see [`is_query_canceled`]).
pub(crate) fn classify_server_error(code: &SqlState, message: &str) -> DbError {
    if *code == SqlState::QUERY_CANCELED && message.contains("statement timeout") {
        return DbError::Timeout;
    }
    DbError::QueryFailed {
        sqlstate: Some(code.code().to_string()),
        message: message.to_string(),
    }
}

/// Whether the server stopped the statement with `57014` for a reason its
/// message did not reveal: a cancel request, or a timeout reported in a
/// translated message
pub(crate) fn is_query_canceled(err: &DbError) -> bool {
    matches!(
        err,
        DbError::QueryFailed { sqlstate: Some(code), .. } if code == SqlState::QUERY_CANCELED.code()
    )
}
