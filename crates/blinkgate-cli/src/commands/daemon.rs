//! Daemon control over D-Bus.

use anyhow::{Context, Result};

#[zbus::proxy(
    interface = "org.freedesktop.BlinkGate1",
    default_service = "org.freedesktop.BlinkGate1",
    default_path = "/org/freedesktop/BlinkGate1"
)]
trait BlinkGate {
    fn activate(&self) -> zbus::Result<String>;
    fn deactivate(&self) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
}

fn block_on<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(fut)
}

async fn connect(session: bool) -> Result<BlinkGateProxy<'static>> {
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    BlinkGateProxy::new(&conn)
        .await
        .context("failed to reach blinkgated")
}

pub fn activate(session: bool) -> Result<()> {
    block_on(async move {
        let proxy = connect(session).await?;
        let id = proxy.activate().await.context("activate failed")?;
        println!("session {id} active");
        Ok(())
    })
}

pub fn deactivate(session: bool) -> Result<()> {
    block_on(async move {
        let proxy = connect(session).await?;
        if proxy.deactivate().await.context("deactivate failed")? {
            println!("session stopped");
        } else {
            println!("no active session");
        }
        Ok(())
    })
}

pub fn status(session: bool) -> Result<()> {
    block_on(async move {
        let proxy = connect(session).await?;
        let raw = proxy.status().await.context("status failed")?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).context("daemon returned invalid status JSON")?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok(())
    })
}
