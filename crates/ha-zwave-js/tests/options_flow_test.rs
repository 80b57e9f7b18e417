//! Options flow tests for the Z-Wave JS integration

mod common;

use common::*;
use ha_config_entries::{ConfigEntriesError, ConfigEntry, FlowError, FlowResultType};
use ha_zwave_js::{AddonOptions, ProbeError};
use serde_json::json;

fn full_options(device: &str) -> AddonOptions {
    AddonOptions {
        log_level: Some("info".to_string()),
        emulate_hardware: Some(false),
        ..addon_options(device, "abc123")
    }
}

async fn addon_entry(h: &Harness) -> ConfigEntry {
    h.add_entry(
        "1234",
        json!({
            "url": "ws://host1:3001",
            "usb_path": "/test",
            "network_key": "abc123",
            "use_addon": true,
            "integration_created_addon": false,
        }),
    )
    .await
}

/// Walk an options flow up to the submitted `configure_addon` form
async fn submit_addon_options(
    h: &Harness,
    entry: &ConfigEntry,
    usb_path: &str,
) -> ha_config_entries::FlowResult {
    let result = h.zwave.start_options_flow(&entry.entry_id).await.unwrap();
    assert_eq!(result.step_id.as_deref(), Some("on_supervisor"));
    assert_eq!(result.data_schema[0].default, Some(json!(true)));

    let result = h
        .configure_options(&result, Some(json!({"use_addon": true})))
        .await;
    assert_eq!(result.result_type, FlowResultType::Form);
    assert_eq!(result.step_id.as_deref(), Some("configure_addon"));

    h.configure_options(
        &result,
        Some(json!({
            "usb_path": usb_path,
            "network_key": "abc123",
            "log_level": "info",
            "emulate_hardware": false,
        })),
    )
    .await
}

// ==================== Manual ====================

#[tokio::test]
async fn test_options_manual() {
    let h = Harness::without_supervisor();
    let entry = h
        .add_entry(
            "1234",
            json!({
                "url": "ws://test.org",
                "usb_path": "/test",
                "network_key": "abc123",
                "use_addon": true,
                "integration_created_addon": true,
            }),
        )
        .await;

    let result = h.zwave.start_options_flow(&entry.entry_id).await.unwrap();
    assert_eq!(result.result_type, FlowResultType::Form);
    assert_eq!(result.step_id.as_deref(), Some("manual"));
    assert_eq!(result.data_schema[0].default, Some(json!("ws://test.org")));

    let result = h
        .configure_options(&result, Some(json!({"url": "ws://localhost:3000"})))
        .await;

    assert_eq!(result.result_type, FlowResultType::CreateEntry);
    assert_eq!(result.data, Some(json!({})));

    let entry = h.entry(&entry.entry_id);
    assert_eq!(entry.data_str("url"), Some("ws://localhost:3000"));
    assert!(!entry.data_bool("use_addon"));
    assert!(!entry.data_bool("integration_created_addon"));
    assert_eq!(entry.data_str("usb_path"), None);
    assert_eq!(entry.data_str("network_key"), None);
    assert!(entry.is_loaded());
    assert_eq!(h.lifecycle.unloads(), 1);
    assert_eq!(h.lifecycle.setups(), 2);
    // Options flows never create entries.
    assert_eq!(h.entries.len(), 1);
}

#[tokio::test]
async fn test_options_manual_different_device() {
    let h = Harness::without_supervisor();
    let entry = h
        .add_entry("1234", json!({"url": "ws://test.org"}))
        .await;
    h.probe.answer(Ok(version_info(5678)));

    let result = h.zwave.start_options_flow(&entry.entry_id).await.unwrap();
    let result = h
        .configure_options(&result, Some(json!({"url": "ws://localhost:3000"})))
        .await;

    assert_eq!(result.result_type, FlowResultType::Abort);
    assert_eq!(result.reason.as_deref(), Some("different_device"));
    assert_eq!(h.entry(&entry.entry_id).data_str("url"), Some("ws://test.org"));
    assert_eq!(h.lifecycle.setups(), 2);
}

#[tokio::test]
async fn test_options_manual_errors() {
    let h = Harness::without_supervisor();
    let entry = h
        .add_entry("1234", json!({"url": "ws://test.org"}))
        .await;
    h.probe
        .answer_once(Err(ProbeError::CannotConnect("refused".into())));

    let result = h.zwave.start_options_flow(&entry.entry_id).await.unwrap();
    let result = h
        .configure_options(&result, Some(json!({"url": "http://localhost:3000"})))
        .await;
    assert_eq!(result.base_error(), Some("invalid_ws_url"));

    let result = h
        .configure_options(&result, Some(json!({"url": "ws://localhost:3000"})))
        .await;
    assert_eq!(result.base_error(), Some("cannot_connect"));

    // Still at the form: nothing reloaded yet.
    assert_eq!(h.lifecycle.setups(), 1);
    assert_eq!(h.probe.urls(), vec!["ws://localhost:3000".to_string()]);
}

// ==================== Add-on ====================

#[tokio::test]
async fn test_options_addon_running_restart() {
    let h = Harness::with_addon(MockAddon::running(full_options("/test")));
    let entry = addon_entry(&h).await;

    let result = submit_addon_options(&h, &entry, "/new").await;
    assert_eq!(result.result_type, FlowResultType::Progress);
    assert_eq!(result.step_id.as_deref(), Some("start_addon"));
    assert_eq!(h.lifecycle.unloads(), 1);

    let result = h.finish_options_progress(&result).await;
    assert_eq!(result.result_type, FlowResultType::CreateEntry);
    assert_eq!(result.data, Some(json!({})));

    let addon = h.addon();
    assert_eq!(addon.set_options_calls(), vec![full_options("/new")]);
    assert_eq!(addon.count(&AddonCall::Restart), 1);
    assert_eq!(addon.count(&AddonCall::Start), 0);

    // One disconnect before the restart, one reconnect at the end.
    assert_eq!(h.lifecycle.unloads(), 1);
    assert_eq!(h.lifecycle.setups(), 2);

    let entry = h.entry(&entry.entry_id);
    assert!(entry.is_loaded());
    assert_eq!(entry.data_str("usb_path"), Some("/new"));
    assert_eq!(entry.data_str("url"), Some("ws://host1:3001"));
    assert!(entry.data_bool("use_addon"));
}

#[tokio::test]
async fn test_options_addon_running_unchanged() {
    let h = Harness::with_addon(MockAddon::running(full_options("/test")));
    let entry = addon_entry(&h).await;

    let result = submit_addon_options(&h, &entry, "/test").await;

    assert_eq!(result.result_type, FlowResultType::CreateEntry);
    let addon = h.addon();
    assert!(addon.set_options_calls().is_empty());
    assert_eq!(addon.count(&AddonCall::Restart), 0);
    assert_eq!(h.lifecycle.unloads(), 1);
    assert_eq!(h.lifecycle.setups(), 2);
}

#[tokio::test]
async fn test_options_keeps_unknown_addon_keys() {
    let mut options = full_options("/test");
    options
        .extra
        .insert("s0_legacy_key".to_string(), json!("old"));
    let h = Harness::with_addon(MockAddon::running(options));
    let entry = addon_entry(&h).await;

    let result = submit_addon_options(&h, &entry, "/new").await;
    h.finish_options_progress(&result).await;

    let written = h.addon().set_options_calls();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].device.as_deref(), Some("/new"));
    assert_eq!(written[0].extra["s0_legacy_key"], "old");
}

#[tokio::test]
async fn test_options_different_device_reverts() {
    let h = Harness::with_addon(MockAddon::running(full_options("/test")));
    let entry = addon_entry(&h).await;
    h.probe.answer(Ok(version_info(5678)));

    let result = submit_addon_options(&h, &entry, "/new").await;
    assert_eq!(result.step_id.as_deref(), Some("start_addon"));

    // The new add-on controls another network: the original options are
    // restored and the add-on restarted again.
    let result = h.finish_options_progress(&result).await;
    assert_eq!(result.result_type, FlowResultType::Progress);
    assert_eq!(result.step_id.as_deref(), Some("start_addon"));

    let result = h.finish_options_progress(&result).await;
    assert_eq!(result.result_type, FlowResultType::Abort);
    assert_eq!(result.reason.as_deref(), Some("different_device"));

    let addon = h.addon();
    assert_eq!(
        addon.set_options_calls(),
        vec![full_options("/new"), full_options("/test")]
    );
    assert_eq!(addon.count(&AddonCall::Restart), 2);
    assert_eq!(addon.options_now(), full_options("/test"));

    assert_eq!(h.lifecycle.unloads(), 1);
    assert_eq!(h.lifecycle.setups(), 2);
    assert_eq!(h.entry(&entry.entry_id).data_str("usb_path"), Some("/test"));
}

#[tokio::test]
async fn test_options_restart_failed_reverts() {
    let h = Harness::with_addon(MockAddon::running(full_options("/test")).failing("restart"));
    let entry = addon_entry(&h).await;

    let result = submit_addon_options(&h, &entry, "/new").await;
    let result = h.finish_options_progress(&result).await;
    assert_eq!(result.result_type, FlowResultType::Progress);

    let result = h.finish_options_progress(&result).await;
    assert_eq!(result.result_type, FlowResultType::Abort);
    assert_eq!(result.reason.as_deref(), Some("addon_start_failed"));

    let addon = h.addon();
    assert_eq!(addon.set_options_calls().len(), 2);
    assert_eq!(addon.count(&AddonCall::Restart), 2);
    assert_eq!(h.lifecycle.setups(), 2);
}

#[tokio::test]
async fn test_options_running_server_info_failure() {
    let h = Harness::with_addon(MockAddon::running(full_options("/test")));
    let entry = addon_entry(&h).await;
    h.probe
        .answer(Err(ProbeError::CannotConnect("timeout".into())));

    let result = submit_addon_options(&h, &entry, "/test").await;

    assert_eq!(result.result_type, FlowResultType::Abort);
    assert_eq!(result.reason.as_deref(), Some("cannot_connect"));
    assert!(h.addon().set_options_calls().is_empty());
    assert_eq!(h.lifecycle.setups(), 2);
}

#[tokio::test]
async fn test_options_set_config_failure() {
    let h = Harness::with_addon(MockAddon::running(full_options("/test")).failing("set_options"));
    let entry = addon_entry(&h).await;

    let result = submit_addon_options(&h, &entry, "/new").await;

    assert_eq!(result.reason.as_deref(), Some("addon_set_config_failed"));
    assert_eq!(h.addon().count(&AddonCall::Restart), 0);
    assert_eq!(h.lifecycle.unloads(), 1);
    assert_eq!(h.lifecycle.setups(), 2);
}

#[tokio::test]
async fn test_options_addon_not_installed() {
    let h = Harness::with_addon(MockAddon::not_installed());
    let entry = h
        .add_entry("1234", json!({"url": "ws://test.org", "use_addon": false}))
        .await;

    let result = h.zwave.start_options_flow(&entry.entry_id).await.unwrap();
    assert_eq!(result.data_schema[0].default, Some(json!(false)));
    let result = h
        .configure_options(&result, Some(json!({"use_addon": true})))
        .await;
    assert_eq!(result.result_type, FlowResultType::Progress);
    assert_eq!(result.step_id.as_deref(), Some("install_addon"));

    let result = h.finish_options_progress(&result).await;
    assert_eq!(result.step_id.as_deref(), Some("configure_addon"));
    let fields: Vec<&str> = result.data_schema.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        fields,
        vec!["usb_path", "network_key", "log_level", "emulate_hardware"]
    );

    let result = h
        .configure_options(
            &result,
            Some(json!({"usb_path": "/test", "network_key": "abc123"})),
        )
        .await;
    assert_eq!(result.step_id.as_deref(), Some("start_addon"));

    let result = h.finish_options_progress(&result).await;
    assert_eq!(result.result_type, FlowResultType::CreateEntry);

    let addon = h.addon();
    assert_eq!(addon.set_options_calls(), vec![full_options("/test")]);
    assert_eq!(addon.count(&AddonCall::Start), 1);
    assert_eq!(addon.count(&AddonCall::Restart), 0);

    let entry = h.entry(&entry.entry_id);
    assert_eq!(entry.data_str("url"), Some("ws://host1:3001"));
    assert_eq!(entry.data_str("usb_path"), Some("/test"));
    assert!(entry.data_bool("use_addon"));
    assert!(entry.data_bool("integration_created_addon"));
}

#[tokio::test]
async fn test_options_unknown_entry() {
    let h = Harness::with_addon(MockAddon::running(full_options("/test")));

    let result = h.zwave.start_options_flow("missing").await;

    assert!(matches!(
        result,
        Err(FlowError::Entries(ConfigEntriesError::NotFound(_)))
    ));
    assert!(h.zwave.options().progress("zwave_js").is_empty());
}
