use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::{AppError, AppResult};
use crate::models::{CandidateSummary, QuizAnswers};

/// How many candidates the prompt is bounded to
const PROMPT_CANDIDATE_LIMIT: usize = 20;

/// How many characters of each synopsis make it into the prompt
const OVERVIEW_PROMPT_CHARS: usize = 200;

/// Number of secondary recommendations
pub const SECONDARY_COUNT: usize = 4;

/// Justification used when the generative call could not be recovered
pub const FALLBACK_REASONING: &str =
    "Ce film correspond à ton humeur actuelle et tes préférences.";

/// Tagline used for fallback and backfilled secondaries
pub const GENERIC_TAGLINE: &str = "Une alternative qui pourrait te plaire.";

/// Mood-keyed reasoning templates for mock mode; `{genre}` is substituted
const MOCK_REASONING_TEMPLATES: &[(&str, &[&str])] = &[
    (
        "joyeux",
        &[
            "Tu rayonnes de bonne humeur ! Ce film va amplifier cette énergie positive avec son {genre} captivant. Parfait pour prolonger ce moment de bonheur.",
            "Avec ton état d'esprit radieux, ce {genre} lumineux va te faire passer un excellent moment. L'alchimie entre les personnages reflète ta joie actuelle.",
        ],
    ),
    (
        "triste",
        &[
            "Parfois, un bon film aide à traverser les moments difficiles. Ce {genre} touchant t'accompagnera avec douceur et te rappellera que les émotions font partie de la vie.",
            "Ce film a cette capacité rare de nous comprendre quand on ne va pas bien. Son {genre} sensible résonnera avec ce que tu ressens.",
        ],
    ),
    (
        "stressé",
        &[
            "Tu as besoin de décompresser ! Ce {genre} va te permettre de t'évader complètement et d'oublier tes soucis pendant quelques heures.",
            "Rien de tel qu'un bon {genre} pour relâcher la pression. Ce film te transportera loin de ton stress quotidien.",
        ],
    ),
    (
        "curieux",
        &[
            "Ton esprit curieux va adorer ce {genre} qui pose des questions fascinantes. Prépare-toi à être surpris et à réfléchir !",
            "Ce {genre} intelligent va nourrir ta curiosité. Chaque scène apporte son lot de découvertes et de rebondissements.",
        ],
    ),
    (
        "romantique",
        &[
            "L'amour est dans l'air ! Ce {genre} va faire battre ton cœur avec son histoire touchante et ses moments magiques.",
            "Parfait pour ton humeur romantique, ce film capture magnifiquement la beauté des sentiments avec son {genre} émouvant.",
        ],
    ),
    (
        "aventurier",
        &[
            "Tu veux de l'action ? Ce {genre} palpitant va te tenir en haleine du début à la fin. Accroche-toi !",
            "Ton esprit aventurier va être comblé par ce {genre} épique. Des paysages grandioses et des héros courageux t'attendent.",
        ],
    ),
    (
        "nostalgique",
        &[
            "Ce {genre} a cette magie des films qui nous marquent pour toujours. Il va résonner avec tes souvenirs les plus précieux.",
            "Parfait pour ton humeur nostalgique, ce classique du {genre} te ramènera à une époque où tout semblait plus simple.",
        ],
    ),
];

const MOCK_DEFAULT_TEMPLATES: &[&str] = &[
    "Ce {genre} correspond parfaitement à ce que tu recherches ce soir. Son ambiance unique va te captiver dès les premières minutes.",
    "Un excellent choix pour ton humeur actuelle ! Ce {genre} a tout ce qu'il faut pour te faire passer un moment mémorable.",
];

const MOCK_TAGLINES: &[&str] = &[
    "Une pépite qui va te surprendre",
    "Un classique incontournable",
    "Pour les amateurs de sensations fortes",
    "Un voyage émotionnel garanti",
    "Du pur divertissement",
    "Une histoire qui reste en tête",
    "À voir absolument ce soir",
    "Le choix parfait pour ton mood",
];

/// External generative model collaborator
///
/// Its output is untrusted free text; everything downstream must
/// parse-and-validate.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait GenerativeClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> AppResult<String>;
}

/// Gemini `generateContent` REST client
pub struct GeminiClient {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, api_url: String, model: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url,
            model,
        }
    }
}

#[async_trait::async_trait]
impl GenerativeClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> AppResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_url, self.model
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "Gemini API returned status {}: {}",
                status, body
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        payload
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                AppError::ExternalApi("Gemini response carried no text part".to_string())
            })
    }
}

/// Sliding-window rate limiter
///
/// Admits at most `max_requests` calls per rolling window. A full window
/// suspends the caller until the oldest admitted call ages out; the shared
/// queue is re-checked after every wakeup so concurrent waiters cannot
/// oversubscribe the window.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admitted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            admitted: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until a slot is available, then records the admission
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut admitted = self.admitted.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = admitted.front() {
                    if now.duration_since(oldest) >= self.window {
                        admitted.pop_front();
                    } else {
                        break;
                    }
                }

                if admitted.len() < self.max_requests {
                    admitted.push_back(now);
                    return;
                }

                // Lock released before sleeping
                self.window - now.duration_since(*admitted.front().expect("window is full"))
            };

            tokio::time::sleep(wait).await;
        }
    }
}

/// How a ranking was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingSource {
    /// Parsed from a live generative call
    Model,
    /// Templated mock-mode output
    Template,
    /// Deterministic similarity-order fallback
    Fallback,
}

/// Ranking strategy selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankerMode {
    Live,
    Mock,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryPick {
    pub film_id: i64,
    pub title: String,
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryPick {
    pub film_id: i64,
    pub title: String,
    pub tagline: Option<String>,
}

/// One primary and up to four secondary picks
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRanking {
    pub primary: PrimaryPick,
    pub secondary: Vec<SecondaryPick>,
    pub source: RankingSource,
}

/// Internal ranker failures; always absorbed into a fallback ranking and
/// never surfaced to the caller
#[derive(thiserror::Error, Debug)]
enum RankerError {
    #[error("generative call failed: {0}")]
    Unavailable(String),
    #[error("malformed ranker output: {0}")]
    MalformedOutput(String),
}

#[derive(Deserialize)]
struct RawRanking {
    primary: RawPrimary,
    #[serde(default)]
    secondary: Vec<RawSecondary>,
}

#[derive(Deserialize)]
struct RawPrimary {
    film_id: i64,
    title: String,
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct RawSecondary {
    film_id: i64,
    title: String,
    tagline: Option<String>,
}

/// Ranks a candidate shortlist with the generative model
///
/// Every failure past the empty-candidates precondition degrades to a
/// deterministic fallback; the end-to-end request never fails because the
/// external ranker did.
pub struct LlmRanker {
    client: Arc<dyn GenerativeClient>,
    rate_limiter: RateLimiter,
    mode: RankerMode,
}

impl LlmRanker {
    pub fn new(client: Arc<dyn GenerativeClient>, mode: RankerMode, requests_per_minute: usize) -> Self {
        Self {
            client,
            rate_limiter: RateLimiter::new(requests_per_minute, Duration::from_secs(60)),
            mode,
        }
    }

    /// Selects one primary and up to four secondary picks from candidates
    ///
    /// Candidates must be non-empty and must already be in descending
    /// similarity order; fallback and mock paths rely on that order.
    pub async fn rank(
        &self,
        answers: &QuizAnswers,
        candidates: &[CandidateSummary],
    ) -> AppResult<LlmRanking> {
        if candidates.is_empty() {
            return Err(AppError::NoCandidates);
        }

        match self.mode {
            RankerMode::Mock => Ok(mock_ranking(&answers.mood, candidates)),
            RankerMode::Live => match self.call_model(answers, candidates).await {
                Ok(ranking) => Ok(ranking),
                Err(e) => {
                    tracing::warn!(error = %e, "Ranker degraded to deterministic fallback");
                    Ok(fallback_ranking(candidates))
                }
            },
        }
    }

    async fn call_model(
        &self,
        answers: &QuizAnswers,
        candidates: &[CandidateSummary],
    ) -> Result<LlmRanking, RankerError> {
        self.rate_limiter.acquire().await;

        let prompt = build_prompt(answers, candidates);
        tracing::debug!(candidates = candidates.len(), "Calling generative ranker");

        let raw = self
            .client
            .complete(&prompt)
            .await
            .map_err(|e| RankerError::Unavailable(e.to_string()))?;

        parse_ranking(&raw, candidates)
    }
}

/// Builds the French ranking prompt over the first 20 candidates
fn build_prompt(answers: &QuizAnswers, candidates: &[CandidateSummary]) -> String {
    let films_context = candidates
        .iter()
        .take(PROMPT_CANDIDATE_LIMIT)
        .map(|c| {
            let overview: String = c
                .overview
                .as_deref()
                .unwrap_or("N/A")
                .chars()
                .take(OVERVIEW_PROMPT_CHARS)
                .collect();
            format!(
                "- ID:{} | {} ({}) | Genres: {} | Note: {}/10 | Synopsis: {}...",
                c.id,
                c.title,
                c.year.as_deref().unwrap_or("N/A"),
                c.genres.join(", "),
                c.vote_average
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "N/A".to_string()),
                overview,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let genres_line = if answers.genres.is_empty()
        || answers.genres.iter().any(|g| g == crate::models::SURPRISE_GENRE)
    {
        "Surprise (tu choisis)".to_string()
    } else {
        answers.genres.join(", ")
    };

    format!(
        r#"Tu es un expert en recommandation de films. Ton rôle est de recommander LE film parfait pour l'utilisateur en fonction de son humeur et de ses préférences.

## PROFIL UTILISATEUR

**Humeur actuelle:**
{mood}

**Temps disponible:** {duration}
**Plateformes:** {platforms}
**Genres souhaités:** {genres}

**Question profonde:** {question}
**Réponse:** {answer}

## FILMS CANDIDATS (par pertinence sémantique)

{films}

## INSTRUCTIONS

Analyse le profil émotionnel de l'utilisateur et sélectionne:
1. UN film principal avec une argumentation personnalisée (2-3 phrases expliquant POURQUOI ce film correspond à son état)
2. 4 films secondaires avec une courte accroche (1 phrase)

Réponds UNIQUEMENT avec ce JSON (pas de texte avant ou après):
{{
  "primary": {{
    "film_id": <id du film>,
    "title": "<titre>",
    "reasoning": "<argumentation personnalisée 2-3 phrases>"
  }},
  "secondary": [
    {{"film_id": <id>, "title": "<titre>", "tagline": "<accroche 1 phrase>"}},
    {{"film_id": <id>, "title": "<titre>", "tagline": "<accroche 1 phrase>"}},
    {{"film_id": <id>, "title": "<titre>", "tagline": "<accroche 1 phrase>"}},
    {{"film_id": <id>, "title": "<titre>", "tagline": "<accroche 1 phrase>"}}
  ]
}}"#,
        mood = answers.mood,
        duration = answers.duration,
        platforms = answers.platforms.join(", "),
        genres = genres_line,
        question = answers.deep_question.question_text,
        answer = answers.deep_question.answer,
        films = films_context,
    )
}

/// Strips an optional markdown code fence around the model output
///
/// Models sometimes add prose before or after the fenced block; only the
/// first fenced segment is kept.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some((_, after_open)) = trimmed.split_once("```") else {
        return trimmed;
    };
    let inner = after_open
        .split_once("```")
        .map(|(inner, _)| inner)
        .unwrap_or(after_open);
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

/// Parses and validates a constrained-JSON ranking
///
/// The primary pick must reference a known candidate; unknown secondary
/// ids are dropped (the orchestrator backfills later).
fn parse_ranking(
    raw: &str,
    candidates: &[CandidateSummary],
) -> Result<LlmRanking, RankerError> {
    let cleaned = strip_code_fence(raw);
    let parsed: RawRanking = serde_json::from_str(cleaned)
        .map_err(|e| RankerError::MalformedOutput(e.to_string()))?;

    let known_ids: HashSet<i64> = candidates.iter().map(|c| c.id).collect();
    if !known_ids.contains(&parsed.primary.film_id) {
        return Err(RankerError::MalformedOutput(format!(
            "primary film_id {} is not a candidate",
            parsed.primary.film_id
        )));
    }

    let secondary = parsed
        .secondary
        .into_iter()
        .filter(|s| known_ids.contains(&s.film_id))
        .take(SECONDARY_COUNT)
        .map(|s| SecondaryPick {
            film_id: s.film_id,
            title: s.title,
            tagline: s.tagline,
        })
        .collect();

    Ok(LlmRanking {
        primary: PrimaryPick {
            film_id: parsed.primary.film_id,
            title: parsed.primary.title,
            reasoning: parsed.primary.reasoning,
        },
        secondary,
        source: RankingSource::Model,
    })
}

/// Deterministic ranking in similarity order with generic copy
fn fallback_ranking(candidates: &[CandidateSummary]) -> LlmRanking {
    let primary = &candidates[0];
    LlmRanking {
        primary: PrimaryPick {
            film_id: primary.id,
            title: primary.title.clone(),
            reasoning: Some(FALLBACK_REASONING.to_string()),
        },
        secondary: candidates
            .iter()
            .skip(1)
            .take(SECONDARY_COUNT)
            .map(|c| SecondaryPick {
                film_id: c.id,
                title: c.title.clone(),
                tagline: Some(GENERIC_TAGLINE.to_string()),
            })
            .collect(),
        source: RankingSource::Fallback,
    }
}

/// Templated mock ranking keyed on mood keywords
///
/// Template choice rotates on the film id so runs are reproducible while
/// different primaries still read differently.
fn mock_ranking(mood: &str, candidates: &[CandidateSummary]) -> LlmRanking {
    let mood_lower = mood.to_lowercase();
    let templates = MOCK_REASONING_TEMPLATES
        .iter()
        .find(|(key, _)| mood_lower.contains(key))
        .map(|(_, templates)| *templates)
        .unwrap_or(MOCK_DEFAULT_TEMPLATES);

    let primary = &candidates[0];
    let genre = primary
        .genres
        .first()
        .map(|g| g.to_lowercase())
        .unwrap_or_else(|| "film".to_string());
    let template = templates[(primary.id as usize) % templates.len()];
    let reasoning = template.replace("{genre}", &genre);

    let secondary = candidates
        .iter()
        .skip(1)
        .take(SECONDARY_COUNT)
        .enumerate()
        .map(|(i, c)| SecondaryPick {
            film_id: c.id,
            title: c.title.clone(),
            tagline: Some(MOCK_TAGLINES[i % MOCK_TAGLINES.len()].to_string()),
        })
        .collect();

    tracing::debug!(mood = %mood, primary = %primary.title, "Templated mock ranking");

    LlmRanking {
        primary: PrimaryPick {
            film_id: primary.id,
            title: primary.title.clone(),
            reasoning: Some(reasoning),
        },
        secondary,
        source: RankingSource::Template,
    }
}
