use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// 伺服器生命週期狀態
///
/// 宣告順序即比較順序，`>=` 用來判斷「至少已到達某狀態」，不可調整。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ServerStatus {
    None = 0,
    Prepared = 1,
    Starting = 2,
    Running = 3,
    Waiting = 4,
    InGame = 5,
    Stopping = 6,
    Stopped = 7,
    Error = 8,
}

impl ServerStatus {
    pub const ALL: [ServerStatus; 9] = [
        ServerStatus::None,
        ServerStatus::Prepared,
        ServerStatus::Starting,
        ServerStatus::Running,
        ServerStatus::Waiting,
        ServerStatus::InGame,
        ServerStatus::Stopping,
        ServerStatus::Stopped,
        ServerStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::None => "NONE",
            ServerStatus::Prepared => "PREPARED",
            ServerStatus::Starting => "STARTING",
            ServerStatus::Running => "RUNNING",
            ServerStatus::Waiting => "WAITING",
            ServerStatus::InGame => "IN_GAME",
            ServerStatus::Stopping => "STOPPING",
            ServerStatus::Stopped => "STOPPED",
            ServerStatus::Error => "ERROR",
        }
    }

    fn from_u8(value: u8) -> ServerStatus {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(ServerStatus::Error)
    }

    /// 實例是否處於可用狀態（自動擴縮時不算阻塞）
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ServerStatus::Running | ServerStatus::Starting | ServerStatus::Prepared
        )
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "未知的伺服器狀態: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for ServerStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// 以原子操作保存的狀態
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub fn new(status: ServerStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    pub fn load(&self) -> ServerStatus {
        ServerStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// 寫入新狀態並返回舊狀態
    pub fn swap(&self, status: ServerStatus) -> ServerStatus {
        ServerStatus::from_u8(self.0.swap(status as u8, Ordering::AcqRel))
    }

    /// 僅在當前狀態為 `current` 時寫入
    pub fn compare_exchange(&self, current: ServerStatus, new: ServerStatus) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
