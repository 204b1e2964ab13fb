// time_utils.rs
//
// 提供毫秒時間戳工具，伺服器的建立時間與玩家變動時間都以毫秒時間戳保存。

use chrono::Utc;

/// 獲取當前系統時間的毫秒時間戳
pub fn current_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// 距離指定時間戳已經過的毫秒數，時鐘回撥時返回 0
pub fn elapsed_since_ms(timestamp_ms: i64) -> u64 {
    current_timestamp_ms().saturating_sub(timestamp_ms).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_since() {
        let now = current_timestamp_ms();
        assert!(elapsed_since_ms(now - 1_000) >= 1_000);
        // 未來時間戳不會產生負值
        assert_eq!(elapsed_since_ms(now + 60_000), 0);
    }

    #[test]
    fn test_current_timestamp_is_epoch_millis() {
        // 2023-11-14 之後的毫秒時間戳
        assert!(current_timestamp_ms() > 1_700_000_000_000);
    }
}
