//! Assembly of the transcript body from the artifact log.

use crate::artifact::{escape_html, Artifact, ArtifactKind};

/// White-space mode shown in the status bar.
const WHITE_SPACE_MODE: &str = "Normal";

fn status_bar(session_id: &str) -> String {
    format!(
        "<div id='status_bar'>\
         \x20 <div id='session_id'>\
         \x20   <span class='label'>Session ID:</span>\
         \x20   <span class='value'>{}</span>\
         \x20 </div>\
         \x20 <div id='white_space'>\
         \x20   <span class='label'>White Space:</span>\
         \x20   <span class='value'>{WHITE_SPACE_MODE}</span>\
         \x20 </div>\
         </div>",
        escape_html(session_id)
    )
}

fn open_group(out: &mut String, group: u32) {
    out.push_str(&format!("<div id='resource_{group}' class='cellgroup'>"));
}

/// Render the status bar and every artifact, one container per group.
///
/// A result that follows a visible image in the same group is rendered hidden.
pub fn render_body(session_id: &str, artifacts: &[Artifact]) -> String {
    let mut out = status_bar(session_id);
    let mut current: Option<u32> = None;
    let mut rendered_image = false;

    for artifact in artifacts {
        match current {
            None => open_group(&mut out, artifact.group()),
            Some(group) if group != artifact.group() => {
                out.push_str("</div>");
                open_group(&mut out, artifact.group());
                rendered_image = false;
            }
            Some(_) => {}
        }
        current = Some(artifact.group());

        let visible = match artifact.kind() {
            ArtifactKind::Image => {
                rendered_image = true;
                true
            }
            ArtifactKind::Result => !rendered_image,
            _ => true,
        };
        out.push_str(&artifact.render(visible));
    }

    if current.is_some() {
        out.push_str("</div>");
    }
    out
}
