//! Resolves which backend to talk to: a local HTTP server family
//! (LM Studio, Ollama, llama.cpp, vLLM) or a subprocess CLI family, plus
//! the base URL, model name, and API key for the call.
//!
//! Resolution order is explicit-argument first, then `OPEN_AGENT_*`
//! environment variables, then a hardcoded default — the same order the
//! CLI uses for every flag it exposes.

use std::env;
use std::str::FromStr;

/// A known local HTTP server family, each with a conventional default port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    LMStudio,
    Ollama,
    LlamaCpp,
    VLLM,
}

/// (provider, default base URL, accepted aliases for `FromStr`)
const PROVIDER_TABLE: &[(Provider, &str, &[&str])] = &[
    (Provider::LMStudio, "http://localhost:1234/v1", &["lmstudio", "lm-studio", "lm_studio"]),
    (Provider::Ollama, "http://localhost:11434/v1", &["ollama"]),
    (Provider::LlamaCpp, "http://localhost:8080/v1", &["llamacpp", "llama-cpp", "llama_cpp", "llama.cpp"]),
    (Provider::VLLM, "http://localhost:8000/v1", &["vllm"]),
];

impl Provider {
    pub fn default_url(&self) -> &'static str {
        PROVIDER_TABLE
            .iter()
            .find(|(p, _, _)| p == self)
            .map(|(_, url, _)| *url)
            .expect("every Provider variant has a table entry")
    }
}

impl FromStr for Provider {
    type Err = String;

    /// Case-insensitive; accepts the dash/underscore/dot spellings seen in
    /// the wild for llama.cpp in particular.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.to_lowercase();
        PROVIDER_TABLE
            .iter()
            .find(|(_, _, aliases)| aliases.contains(&needle.as_str()))
            .map(|(p, _, _)| *p)
            .ok_or_else(|| format!("unknown provider: {s}"))
    }
}

/// Which [`crate::provider::Provider`] adapter a model name routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenAI-compatible SSE backend — every [`Provider`] variant plus any
    /// hosted service speaking the same protocol.
    Http,
    /// A local CLI coding agent driven as a subprocess.
    Subprocess,
}

/// Route a user-facing model name to an adapter family by a `cli:`/
/// `subprocess:` prefix; anything else — including names this crate has
/// never heard of — defaults to HTTP, since that family covers every
/// built-in [`Provider`].
pub fn detect_provider_from_model(name: &str) -> ProviderKind {
    let lower = name.to_lowercase();
    if lower.starts_with("cli:") || lower.starts_with("subprocess:") {
        ProviderKind::Subprocess
    } else {
        ProviderKind::Http
    }
}

/// Bearer token for the HTTP adapter family, read from `OPEN_AGENT_API_KEY`.
/// Most local servers don't check it; hosted OpenAI-protocol services do.
pub fn get_api_key() -> Option<String> {
    env::var("OPEN_AGENT_API_KEY").ok()
}

/// Base URL: `OPEN_AGENT_BASE_URL` env var, then `provider`'s default, then
/// `fallback`, then LM Studio's default as the last resort.
pub fn get_base_url(provider: Option<Provider>, fallback: Option<&str>) -> String {
    env::var("OPEN_AGENT_BASE_URL").ok().unwrap_or_else(|| {
        provider
            .map(|p| p.default_url().to_string())
            .or_else(|| fallback.map(str::to_string))
            .unwrap_or_else(|| Provider::LMStudio.default_url().to_string())
    })
}

/// Model name: when `prefer_env`, `OPEN_AGENT_MODEL` wins over `fallback`;
/// otherwise `fallback` is the only source. `prefer_env = false` lets a
/// caller pin a model in code without a stray env var silently overriding it.
pub fn get_model(fallback: Option<&str>, prefer_env: bool) -> Option<String> {
    if prefer_env {
        if let Ok(model) = env::var("OPEN_AGENT_MODEL") {
            return Some(model);
        }
    }
    fallback.map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_default_urls() {
        assert_eq!(Provider::LMStudio.default_url(), "http://localhost:1234/v1");
        assert_eq!(Provider::Ollama.default_url(), "http://localhost:11434/v1");
        assert_eq!(Provider::LlamaCpp.default_url(), "http://localhost:8080/v1");
        assert_eq!(Provider::VLLM.default_url(), "http://localhost:8000/v1");
    }

    #[test]
    fn provider_from_str_accepts_known_aliases() {
        assert_eq!("lmstudio".parse::<Provider>(), Ok(Provider::LMStudio));
        assert_eq!("LM-Studio".parse::<Provider>(), Ok(Provider::LMStudio));
        assert_eq!("ollama".parse::<Provider>(), Ok(Provider::Ollama));
        assert_eq!("llama.cpp".parse::<Provider>(), Ok(Provider::LlamaCpp));
        assert_eq!("vllm".parse::<Provider>(), Ok(Provider::VLLM));
        assert!("unknown".parse::<Provider>().is_err());
    }

    #[test]
    fn base_url_prefers_env_over_provider_default() {
        // SAFETY: test-local env var, not read by anything outside this process.
        unsafe {
            env::set_var("OPEN_AGENT_BASE_URL", "http://custom:9999/v1");
        }
        assert_eq!(get_base_url(Some(Provider::Ollama), None), "http://custom:9999/v1");
        unsafe {
            env::remove_var("OPEN_AGENT_BASE_URL");
        }
    }

    #[test]
    fn base_url_falls_back_through_provider_then_explicit_then_default() {
        unsafe {
            env::remove_var("OPEN_AGENT_BASE_URL");
        }
        assert_eq!(get_base_url(Some(Provider::Ollama), None), "http://localhost:11434/v1");
        assert_eq!(get_base_url(None, Some("http://custom:8080/v1")), "http://custom:8080/v1");
        assert_eq!(get_base_url(None, None), "http://localhost:1234/v1");
    }

    #[test]
    fn model_resolution_respects_prefer_env() {
        unsafe {
            env::set_var("OPEN_AGENT_MODEL", "env-model");
        }
        assert_eq!(get_model(Some("explicit-model"), true), Some("env-model".to_string()));
        assert_eq!(get_model(Some("explicit-model"), false), Some("explicit-model".to_string()));
        unsafe {
            env::remove_var("OPEN_AGENT_MODEL");
        }
        assert_eq!(get_model(None, true), None);
    }

    #[test]
    fn detect_provider_from_model_routes_cli_prefix_to_subprocess() {
        assert_eq!(detect_provider_from_model("cli:claude-code"), ProviderKind::Subprocess);
        assert_eq!(detect_provider_from_model("CLI:Codex"), ProviderKind::Subprocess);
        assert_eq!(detect_provider_from_model("llama3:8b"), ProviderKind::Http);
        assert_eq!(detect_provider_from_model("qwen2.5-32b"), ProviderKind::Http);
    }
}
