use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Serializable view of the configuration with credentials redacted.
fn config_view(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port,
            "public_host": config.server.public_host
        },
        "services": {
            "stt_url": config.services.stt_url,
            "stt_model": config.services.stt_model,
            "stt_configured": config.services.stt_api_key.is_some(),
            "llm_url": config.services.llm_url,
            "llm_model": config.services.llm_model,
            "llm_configured": config.services.llm_api_key.is_some(),
            "tts_url": config.services.tts_url,
            "tts_model": config.services.tts_model,
            "tts_voice": config.services.tts_voice,
            "tts_configured": config.services.tts_api_key.is_some(),
            "request_timeout_secs": config.services.request_timeout_secs
        },
        "audio": {
            "telephony_sample_rate": config.audio.telephony_sample_rate,
            "busy_policy": config.audio.busy_policy,
            "max_queued_frames": config.audio.max_queued_frames
        },
        "performance": {
            "max_concurrent_calls": config.performance.max_concurrent_calls
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_view(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_view(&current_config)
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    /// Credentials never appear in the serialized view.
    #[test]
    fn test_config_view_redacts_secrets() {
        let mut config = AppConfig::default();
        config.services.llm_api_key = Some("sk-very-secret".to_string());

        let view = config_view(&config);
        let rendered = view.to_string();
        assert!(!rendered.contains("sk-very-secret"));
        assert_eq!(view["services"]["llm_configured"], true);
        assert_eq!(view["services"]["stt_configured"], false);
    }
}
