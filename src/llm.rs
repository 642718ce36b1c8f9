//! Thin client for the hosted generative-text API backing the assistant
//! chat and blog summaries.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

const MODEL: &str = "gemini-2.5-flash-preview-04-17";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1/models";

lazy_static::lazy_static! {
    static ref API_KEY: String =
        std::env::var("GEMINI_API_KEY").expect("GEMINI_API_KEY must be set for chat and summaries");
    static ref CLIENT: reqwest::Client = reqwest::Client::new();
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: String,
}

pub async fn generate(prompt: &str) -> anyhow::Result<String> {
    let url = format!("{API_BASE}/{MODEL}:generateContent?key={}", *API_KEY);

    let response = CLIENT
        .post(&url)
        .json(&GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        })
        .send()
        .await
        .context("generative api request failed")?
        .error_for_status()
        .context("generative api returned an error status")?
        .json::<GenerateResponse>()
        .await
        .context("failed to decode generative api response")?;

    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content.parts.into_iter().next())
        .map(|p| p.text)
        .ok_or_else(|| anyhow!("generative api returned no candidates"))
}

pub async fn summarize(content: &str) -> anyhow::Result<String> {
    let prompt = format!(
        "Please provide a concise summary of the following blog post in 2-3 sentences:\n\n{content}"
    );
    generate(&prompt).await
}
