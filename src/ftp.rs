// ftp.rs: administrative file-transfer worker

use std::future::Future;

use crate::*;

/// One servicing step of the file-transfer server. The server itself lives
/// outside this crate; the worker only drives it.
pub trait FileTransfer: Send {
    fn service(&mut self) -> impl Future<Output = AppResult<()>> + Send;
}

/// Stand-in used when no file-transfer server is linked in. It still holds
/// the login pair a real server would check.
pub struct IdleFileTransfer {
    user: String,
    pass: String,
    announced: bool,
}

impl IdleFileTransfer {
    pub fn new(user: &str, pass: &str) -> Self {
        info!("File transfer: no server linked in, login {user:?} reserved");
        Self {
            user: user.into(),
            pass: pass.into(),
            announced: false,
        }
    }

    pub fn accepts(&self, user: &str, pass: &str) -> bool {
        user == self.user && pass == self.pass
    }
}

impl FileTransfer for IdleFileTransfer {
    async fn service(&mut self) -> AppResult<()> {
        if !self.announced {
            debug!("File transfer idle");
            self.announced = true;
        }
        Ok(())
    }
}

const FTP_YIELD: Duration = Duration::from_millis(1);

/// Worker body: one gated service step, then a short yield, forever.
pub async fn run_file_transfer<F: FileTransfer>(mut ftp: F, gate: Arc<WorkerGate>) -> AppResult<()> {
    loop {
        {
            let _cycle = gate.enter_cycle().await;
            if let Err(e) = ftp.service().await {
                error!("File transfer: {e}");
            }
        }
        sleep(FTP_YIELD).await;
    }
}

// EOF
