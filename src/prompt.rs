//! Prompt assembly for answering and extraction runs.

use knowledge_desk_core::actions::render_task_line;
use knowledge_desk_core::models::{Task, Turn};
use knowledge_desk_core::retrieve::ScoredFragment;

pub const NO_INFORMATION: &str = "No relevant information found in the project knowledge base.";
pub const NO_ACTIVE_TASKS: &str = "No active tasks.";
pub const FALLBACK_ANSWER: &str = "Sorry, I could not generate a response.";

const FRAGMENT_SEPARATOR: &str = "\n\n---\n\n";

/// `[i] title\ncontent` per fragment (1-based), or the placeholder.
pub fn render_fragments(fragments: &[ScoredFragment]) -> String {
    if fragments.is_empty() {
        return NO_INFORMATION.to_string();
    }
    fragments
        .iter()
        .enumerate()
        .map(|(i, f)| format!("[{}] {}\n{}", i + 1, f.title, f.content))
        .collect::<Vec<_>>()
        .join(FRAGMENT_SEPARATOR)
}

/// Bulleted status lines for pending and in-progress tasks, or the placeholder.
pub fn render_active_tasks(tasks: &[Task]) -> String {
    let lines: Vec<String> = tasks
        .iter()
        .filter(|t| t.status.is_active())
        .map(render_task_line)
        .collect();
    if lines.is_empty() {
        NO_ACTIVE_TASKS.to_string()
    } else {
        lines.join("\n")
    }
}

pub fn answer_system_prompt(fragments: &[ScoredFragment], tasks: &[Task]) -> String {
    format!(
        "You are a helpful assistant for a project knowledge base.
Your role is to answer questions based ONLY on the provided context from the project.

IMPORTANT RULES:
1. Only use information from the provided context to answer questions
2. If the context doesn't contain relevant information, clearly say \"I don't have information about that in the current project data\"
3. When answering, reference which piece of context you're using when helpful
4. Be concise but thorough
5. If asked about something not in the context, don't make up information
6. Use the available tools when the user asks you to create tasks, save knowledge, or review tasks

PROJECT CONTEXT:
{}

ACTIVE TASKS:
{}",
        render_fragments(fragments),
        render_active_tasks(tasks)
    )
}

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a helpful assistant that extracts key information from conversations into a knowledge base.

Your task is to analyze the conversation and use the create_context tool to save important insights.

Rules:
1. Extract only genuinely useful information worth remembering
2. Each context entry should be self-contained and understandable without the original conversation
3. Use clear, descriptive titles
4. Content should be concise but complete
5. Focus on: decisions made, facts learned, ideas discussed, requirements identified, solutions found
6. Call create_context for EACH distinct piece of knowledge (you can call it multiple times)
7. If the conversation has no extractable value, simply respond that there's nothing to extract

After extracting all insights, provide a brief summary of what was saved.";

/// `ROLE: content` blocks joined by blank lines.
pub fn render_transcript(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str().to_uppercase(), t.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn extraction_request(transcript: &str) -> String {
    format!(
        "Extract key insights from this conversation and save them to the knowledge base:\n\n{}",
        transcript
    )
}

/// First `max_chars` characters of the question, trimmed.
pub fn conversation_title(question: &str, max_chars: usize) -> String {
    question.trim().chars().take(max_chars).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use knowledge_desk_core::models::TaskStatus;

    fn task(title: &str, description: &str, status: TaskStatus) -> Task {
        Task {
            id: title.to_string(),
            project_id: "p1".into(),
            owner_id: None,
            title: title.into(),
            description: description.into(),
            status,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_no_fragments_uses_placeholder() {
        let prompt = answer_system_prompt(&[], &[]);
        assert!(prompt.contains(NO_INFORMATION));
        assert!(prompt.contains(NO_ACTIVE_TASKS));
    }

    #[test]
    fn test_fragments_are_numbered_and_separated() {
        let fragments = vec![
            ScoredFragment {
                id: "a".into(),
                title: "Deploys".into(),
                content: "Fridays only".into(),
                score: 0.9,
            },
            ScoredFragment {
                id: "b".into(),
                title: "Owners".into(),
                content: "Team Blue".into(),
                score: 0.5,
            },
        ];
        assert_eq!(
            render_fragments(&fragments),
            "[1] Deploys\nFridays only\n\n---\n\n[2] Owners\nTeam Blue"
        );
    }

    #[test]
    fn test_only_active_tasks_are_listed() {
        let tasks = vec![
            task("Ship", "v2", TaskStatus::InProgress),
            task("Old", "", TaskStatus::Completed),
            task("Plan", "", TaskStatus::Pending),
        ];
        assert_eq!(
            render_active_tasks(&tasks),
            "- [in_progress] Ship: v2\n- [pending] Plan"
        );
        assert_eq!(
            render_active_tasks(&[task("Done", "", TaskStatus::Completed)]),
            NO_ACTIVE_TASKS
        );
    }

    #[test]
    fn test_transcript_rendering() {
        let turns = vec![Turn::user("Hi"), Turn::assistant("Hello")];
        assert_eq!(render_transcript(&turns), "USER: Hi\n\nASSISTANT: Hello");
        assert!(extraction_request("USER: Hi").ends_with(":\n\nUSER: Hi"));
    }

    #[test]
    fn test_conversation_title_truncates_by_chars() {
        assert_eq!(conversation_title("  short  ", 50), "short");
        let long = "é".repeat(60);
        assert_eq!(conversation_title(&long, 50).chars().count(), 50);
    }
}
