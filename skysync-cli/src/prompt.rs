//! Terminal implementation of the save dialogs.

use std::io::{self, BufRead, Write};

use skysync_core::{PlacementHint, Project, SaveDecision, SyncUi};

pub struct TerminalUi {
    credentials_hint: String,
}

impl TerminalUi {
    pub fn new(credentials_hint: String) -> Self {
        Self { credentials_hint }
    }

    fn ask(&self, question: &str) -> String {
        print!("{} ", question);
        let _ = io::stdout().flush();
        let mut line = String::new();
        if let Err(e) = io::stdin().lock().read_line(&mut line) {
            log::warn!(target: "cli", "could not read answer: {}", e);
        }
        line.trim().to_string()
    }

    fn confirm(&self, question: &str) -> bool {
        is_yes(&self.ask(&format!("{} [y/N]", question)))
    }

    fn cloud_decision(&self, project: &Project, question: &str) -> SaveDecision {
        if !self.confirm(question) {
            return SaveDecision::local();
        }
        let answer = self.ask(&format!("Cloud title [{}]:", project.title()));
        SaveDecision::cloud(title_or_default(&answer, project.title()))
    }
}

impl SyncUi for TerminalUi {
    fn on_handle_save(&self, project: &Project, _placement: PlacementHint) -> SaveDecision {
        self.cloud_decision(project, &format!("Move '{}' to the cloud?", project.title()))
    }

    fn on_handle_first_save(&self, project: &Project, _placement: PlacementHint) -> SaveDecision {
        self.cloud_decision(project, &format!("Save '{}' to the cloud?", project.title()))
    }

    fn on_unauthorized_save(&self, _placement: PlacementHint) -> bool {
        println!("You are not signed in.");
        println!("Write your credentials to {} and answer y to retry.", self.credentials_hint);
        self.confirm("Retry upload?")
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
}

pub fn title_or_default(answer: &str, default: &str) -> String {
    let answer = answer.trim();
    if answer.is_empty() {
        default.to_string()
    } else {
        answer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_answers() {
        assert!(is_yes("y"));
        assert!(is_yes("YES"));
        assert!(!is_yes(""));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
    }

    #[test]
    fn empty_title_keeps_default() {
        assert_eq!(title_or_default("  ", "Song"), "Song");
        assert_eq!(title_or_default(" Live set ", "Song"), "Live set");
    }
}
