//! Prompt text for each pipeline stage.

use serde_json::json;

pub fn plan_prompt(post_content: &str) -> String {
    format!(
        r#"You are a compassionate and experienced psychological counselor.
Analyze the following user post and simulate the planning process
of a brief therapeutic conversation (1–3 rounds).

Post content:
["{post_content}"]

Return your output strictly in this JSON format:
{{
  "rounds": number (1–3),
  "info_by_round": [list of strings, each describing the focus of one round]
}}"#
    )
}

pub const DIALOGUE_SYSTEM_PROMPT: &str = r#"You are a compassionate and experienced psychological counselor.
Your task is to reconstruct a realistic, emotionally attuned multi-turn conversation (up to 3 rounds)
between a patient and a counselor, based on the emotional themes provided for each round.

Each round must include:
Patient: A natural, first-person paragraph describing their current emotional experience.
Counselor: A warm, reflective, and gentle response that demonstrates empathy and support.

Instructions:
- Ensure a coherent conversational flow across turns.
- Each counselor response should deepen the exploration naturally.
- Avoid vague or abstract metaphors; use concrete emotional language.
Return JSON with this format:
{
  "conversation": [
    {"round": 1, "patient": "...", "counselor": "..."},
    ...
  ]
}"#;

/// User message for the dialogue stage. `rounds` always equals the number of
/// focus entries, whatever the plan claimed.
pub fn dialogue_user_message(info_by_round: &[String]) -> String {
    let payload = json!({
        "rounds": info_by_round.len(),
        "info_by_round": info_by_round,
    });
    format!("Input JSON:\n{payload}")
}

pub const COUNSEL_SYSTEM_PROMPT: &str = "You are a warm, compassionate, and emotionally attuned psychological counselor. \
Read the client’s message carefully and respond with empathy and emotional understanding.\n\n\
Guidelines:\n\
1. Silently refer to ICD-11 and DSM-5 as background for emotional awareness, \
but never include or imply any diagnostic or technical terms.\n\
2. Suggest one helpful therapeutic approach (e.g., cognitive behavioral, humanistic, psychodynamic, \
family systems, integrative) in simple and relatable language. \
Briefly describe how it may support the client emotionally, without sounding academic.\n\
3. Use a conversational, caring tone. Avoid robotic or formal responses.\n\
4. Keep responses concise: ≤50 words for light input; ≤150 words for emotional depth.\n\
Focus entirely on the client’s emotional needs, not theoretical frameworks.";

pub const REVIEW_SYSTEM_PROMPT: &str = "You are a meticulous dialogue data quality reviewer for psychological counseling conversations. \
Each sample contains multiple turns with fields: `patient`, `counselor_think`, and `counselor_content`.\n\n\
Identify flawed or unusable samples based on these four criteria:\n\
1. counselor_think is incomplete or lacks analytical clarity.\n\
2. The dialogue is incoherent or contextually inconsistent.\n\
3. counselor_think and counselor_content are mismatched.\n\
4. counselor_think lacks grounding in recognized therapeutic frameworks \
(e.g., cognitive-behavioral, humanistic, psychodynamic) or ICD-11/DSM-5 principles.\n\n\
Return ONLY a valid JSON object in this exact format:\n\
{\n  \"keep\": true/false,\n  \"issues\": [list of issue numbers],\n  \"reason\": \"brief explanation\"\n}\n\
Do not include any commentary, Markdown, or additional text.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_prompt_embeds_post() {
        let p = plan_prompt("I lost my job and can't tell my family.");
        assert!(p.contains("[\"I lost my job and can't tell my family.\"]"));
        assert!(p.contains("\"info_by_round\""));
        assert!(!p.starts_with('\n'));
    }

    #[test]
    fn dialogue_message_counts_rounds_from_focus_list() {
        let msg = dialogue_user_message(&["shame".to_string(), "next steps".to_string()]);
        let json: serde_json::Value =
            serde_json::from_str(msg.strip_prefix("Input JSON:\n").unwrap()).unwrap();
        assert_eq!(json["rounds"], 2);
        assert_eq!(json["info_by_round"][1], "next steps");
    }

    #[test]
    fn review_prompt_lists_four_criteria() {
        for n in 1..=4 {
            assert!(REVIEW_SYSTEM_PROMPT.contains(&format!("\n{n}. ")));
        }
    }
}
