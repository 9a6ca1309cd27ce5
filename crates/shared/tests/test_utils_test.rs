//! test_utils 模块的集成测试
//!
//! 验证测试工具模块的功能正确性

use chrono::{Datelike, Duration, Timelike};
use progress_shared::test_utils::*;

#[test]
fn test_user_ids_are_unique() {
    let a = test_user_id();
    let b = test_user_id();
    assert_ne!(a, b);
    assert!(a.starts_with("test-user-"));
}

#[test]
fn test_ledger_settings_are_short() {
    let settings = test_ledger_settings();
    assert_eq!(settings.persistence_timeout_ms, 500);
    assert_eq!(settings.lock_retry_delay_ms, 10);
    // 未覆盖的字段保持默认
    assert_eq!(settings.leaderboard_max_limit, 100);
}

#[test]
fn test_app_config_enables_migrations() {
    let config = test_app_config();
    assert!(config.database.run_migrations);
    assert_eq!(config.environment, "test");
    assert!(!config.is_production());
}

#[test]
fn test_base_time_is_fixed() {
    let t = base_time();
    assert_eq!(t.year(), 2024);
    assert_eq!(t.month(), 3);
    assert_eq!(t.day(), 1);
    assert_eq!(t.hour(), 9);
}

#[test]
fn test_time_offsets() {
    let t = base_time();
    assert_eq!(t - hours_before(t, 30), Duration::hours(30));
    assert_eq!(t - days_before(t, 3), Duration::days(3));
}
