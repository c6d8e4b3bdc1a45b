pub struct PresencePrompt {
    pub title: String,
    pub description: String,
}

pub(crate) fn link_prompt(rp_id: &str, session_id: &str) -> PresencePrompt {
    PresencePrompt {
        title: "keylink".to_string(),
        description: format!(
            "Link a device\n\nSite: {rp_id}\nSession: {session_id}\n\nPress OK to approve, or Cancel to deny."
        ),
    }
}
