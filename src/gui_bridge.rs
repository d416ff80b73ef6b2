use crate::config::Config;
use crate::protocol::GuiNotice;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum GuiEvent {
    Message(String),
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    buffer_size: usize,
    tx: mpsc::Sender<GuiEvent>,
}

// UI进程和Core进程通过本地UDP通信，地址和端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        Self::bind(
            &format!("{}:{}", config.gui_local_ip, config.gui_local_port),
            format!("{}:{}", config.gui_remote_ip, config.gui_remote_port),
            config.gui_buffer_size,
            tx,
        )
        .await
    }

    pub async fn bind(
        local_addr: &str,
        target_addr: String,
        buffer_size: usize,
        tx: mpsc::Sender<GuiEvent>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        log::info!("GuiBridge listening on {}, UI at {}", socket.local_addr()?, target_addr);
        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            buffer_size,
            tx,
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            // 通过UDP socket接收消息
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            match std::str::from_utf8(&buf[..len]) {
                Ok(msg) => {
                    if let Err(e) = self.tx.send(GuiEvent::Message(msg.to_string())).await {
                        log::error!("Failed to send GUI event: {}", e);
                        break;
                    }
                }
                Err(e) => log::warn!("Dropping non UTF-8 GUI datagram: {}", e),
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }

    pub async fn send_notice(&self, notice: &GuiNotice) -> anyhow::Result<()> {
        self.send_message(&notice.to_json()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn forwards_datagrams_and_sends_notices() {
        let ui = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let bridge = Arc::new(
            GuiBridge::bind("127.0.0.1:0", ui.local_addr().unwrap().to_string(), 1024, tx)
                .await
                .unwrap(),
        );
        let runner = bridge.clone();
        tokio::spawn(async move { runner.run().await });

        ui.send_to(br#"{"type":"tracks"}"#, bridge.local_addr().unwrap())
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(GuiEvent::Message(m)) if m == r#"{"type":"tracks"}"#));

        bridge.send_notice(&GuiNotice::toast("hello")).await.unwrap();
        let mut buf = [0u8; 256];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), ui.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], br#"{"type":"toast","text":"hello"}"#);
    }
}
