//! User-facing reply texts.

use moodboard_contracts::chat::menu_commands;

use crate::compose::MAX_REFERENCES;

pub fn welcome() -> String {
    let mut out = String::from("Welcome! I'm your style-transfer bot.\nAvailable commands:\n");
    for spec in menu_commands().filter(|spec| spec.command != "start") {
        out.push_str(&format!("/{} - {}\n", spec.command, spec.description));
    }
    out.push_str("\nOnce your style is set, send me the photo you want to transform!");
    out
}

pub fn collecting_started() -> String {
    "Set Style mode on! Send me every image that should define the mood, as many as you like.\n\
     When you are done, type /done_style."
        .to_string()
}

pub fn collecting_finished(count: usize) -> String {
    format!(
        "Set Style mode off. You have {count} reference images saved.\n\
         Now send me the photo (subject) you want to transform."
    )
}

pub fn references_cleared() -> String {
    "All saved reference images were deleted.".to_string()
}

pub fn status(count: usize) -> String {
    if count == 0 {
        return "You have no reference images saved. Use /set_style before sending photos to transform."
            .to_string();
    }
    format!("You have {count} reference images saved.")
}

pub fn reference_saved(count: usize) -> String {
    format!("Reference image saved. You have {count} saved.")
}

pub fn reference_saved_from_caption(count: usize) -> String {
    format!("Caption recognised! Reference image added. Total references: {count}")
}

pub fn no_references() -> String {
    "You haven't set any style reference image yet. Use /set_style, send me a few moodboard \
     images, then close with /done_style before sending the photo you want to transform."
        .to_string()
}

pub fn generating() -> String {
    "Subject received. Generating the new image with Gemini, please wait...".to_string()
}

pub fn references_truncated(total: usize) -> String {
    format!(
        "You have {total} saved references. Using the first {MAX_REFERENCES} so the model is not \
         overloaded; the mood is preserved."
    )
}

pub fn transformed_caption() -> String {
    "Here is your transformed image!".to_string()
}

pub fn generation_empty() -> String {
    "Generation failed: no image was returned.".to_string()
}

pub fn quota_exceeded() -> String {
    "Error 429: the Gemini quota is exhausted (Resource Exhausted).\n\n\
     The model limits how many images can be generated per minute and per day.\n\
     1. Wait a minute or two and try again.\n\
     2. If it keeps happening, today's limit has been reached."
        .to_string()
}

pub fn generation_failed(diagnostic: &str) -> String {
    format!("An error occurred while generating the image: {diagnostic}")
}

pub fn storage_unavailable() -> String {
    "Reference storage is unavailable right now. Please try again in a moment.".to_string()
}

pub fn unknown_command(command: &str) -> String {
    format!("Unknown command /{command}. Type /start to see what I can do.")
}

pub fn send_a_photo() -> String {
    "Send me a photo: in /set_style mode it becomes a style reference, otherwise I transform it \
     with your saved mood."
        .to_string()
}

pub fn unexpected_error() -> String {
    "Something went wrong while handling your message. Please try again.".to_string()
}

#[cfg(test)]
mod tests {
    #[test]
    fn welcome_lists_menu_commands() {
        let text = super::welcome();
        for command in ["/set_style", "/done_style", "/clear_style", "/status"] {
            assert!(text.contains(command), "missing {command}");
        }
        assert!(!text.contains("/help"));
    }

    #[test]
    fn status_guides_when_empty() {
        assert!(super::status(0).contains("/set_style"));
        assert_eq!(super::status(3), "You have 3 reference images saved.");
    }
}
