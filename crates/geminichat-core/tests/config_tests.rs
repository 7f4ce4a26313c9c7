use geminichat_core::config::Settings;
use geminichat_core::*;
use tempfile::TempDir;

// ========================================================================
// Settings (config/mod.rs)
// ========================================================================

#[test]
fn test_settings_default_values() {
    let settings = Settings::default();

    assert_eq!(settings.provider.model, "gemini-2.5-flash");
    assert_eq!(settings.provider.api_key_env, "GOOGLE_API_KEY");
    assert!(settings.provider.api_key.is_none());
    assert_eq!(
        settings.provider.base_url,
        "https://generativelanguage.googleapis.com"
    );

    assert_eq!(settings.generation.temperature(), 0.7);
    assert_eq!(settings.generation.top_p(), 0.95);
    assert!(settings.generation.thinking_budget().is_none());
    assert!(!settings.generation.grounding_enabled());

    assert!(settings.session.rollback_user_turn_on_failure);
    assert_eq!(settings.cache.poll_interval_secs, 10);
    assert_eq!(settings.cache.max_wait_secs, 600);
    assert_eq!(settings.attachments.categories, MimeCategory::all());
}

#[test]
fn test_settings_save_and_reload_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    let mut settings = Settings::default();
    settings.provider.model = "gemini-2.5-pro".into();
    settings.generation.set_temperature(0.2).unwrap();
    settings.generation.set_thinking_budget(Some(1024)).unwrap();
    settings
        .generation
        .set_system_instruction(Some("You are terse.".into()));
    settings.generation.set_grounding(true);
    settings.session.rollback_user_turn_on_failure = false;
    settings.attachments.categories = vec![MimeCategory::Image, MimeCategory::Document];

    settings.save_to(&path).unwrap();
    let loaded = Settings::load_from(&path).unwrap();

    assert_eq!(loaded.provider.model, "gemini-2.5-pro");
    assert_eq!(loaded.generation, settings.generation);
    assert!(!loaded.session.rollback_user_turn_on_failure);
    assert_eq!(
        loaded.attachments.categories,
        [MimeCategory::Image, MimeCategory::Document]
    );
}

#[test]
fn test_partial_file_fills_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[generation]\ntemperature = 0.3\n\n[cache]\nmax_wait_secs = 120\n",
    )
    .unwrap();

    let loaded = Settings::load_from(&path).unwrap();
    assert_eq!(loaded.generation.temperature(), 0.3);
    assert_eq!(loaded.generation.top_p(), 0.95);
    assert_eq!(loaded.cache.max_wait_secs, 120);
    assert_eq!(loaded.cache.poll_interval_secs, 10);
    assert_eq!(loaded.provider.model, "gemini-2.5-flash");
}

#[test]
fn test_out_of_range_file_values_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[generation]\ntemperature = 1.7\n").unwrap();

    let err = Settings::load_from(&path).unwrap_err();
    assert!(matches!(err, ChatError::Config(_)));
}

#[test]
fn test_unknown_category_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "[attachments]\ncategories = [\"hologram\"]\n").unwrap();
    assert!(Settings::load_from(&path).is_err());
}

#[test]
fn test_allow_list_follows_settings() {
    let mut settings = Settings::default();
    settings.attachments.categories = vec![MimeCategory::Audio];
    settings.attachments.extra_mime_types = vec!["application/x-ndjson".into()];

    let allow = settings.allow_list();
    assert!(allow.allows("audio/mpeg"));
    assert!(allow.allows("application/x-ndjson"));
    assert!(!allow.allows("image/png"));
}

#[test]
fn test_build_client_needs_a_key() {
    let mut settings = Settings::default();
    settings.provider.api_key_env = "GEMINICHAT_TEST_KEY_THAT_IS_NEVER_SET".into();
    assert!(matches!(settings.build_client(), Err(ChatError::Config(_))));

    settings.provider.api_key = Some("abc".into());
    assert!(settings.build_client().is_ok());
}

#[test]
fn test_session_from_settings_uses_model_and_policy() {
    let mut settings = Settings::default();
    settings.provider.model = "gemini-2.0-flash".into();
    settings.provider.api_key = Some("abc".into());
    settings.session.rollback_user_turn_on_failure = false;

    let client = settings.build_client().unwrap();
    let session = ChatSession::from_settings(std::sync::Arc::new(client), &settings);
    assert_eq!(session.model(), "gemini-2.0-flash");
    assert!(!session.policy().rollback_user_turn_on_failure);
}
