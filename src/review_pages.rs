//! HTML for the browser review surface.

use crate::review_surface::{BatchSummary, EntityReview, EntryStatus};

const STYLE: &str = "body{font-family:sans-serif;margin:2em;background:#f4f1ea;color:#222}\
.grid{display:flex;flex-wrap:wrap;gap:1.5em}\
.card{background:#fff;padding:1em;border-radius:6px;box-shadow:0 1px 3px #0003;max-width:420px}\
.card img{max-width:400px;max-height:520px;display:block}\
.meta{font-size:0.85em;color:#555}\
.warn{background:#fde2c8;padding:0.5em 1em;border-radius:4px}\
table{border-collapse:collapse}td,th{padding:0.2em 0.8em;text-align:left}";

pub fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Browser-side draft key for one entity of one batch.
pub fn storage_key(batch_id: &str, entity_id: i64) -> String {
    format!("card-review:{batch_id}:{entity_id}")
}

/// JSON string literal that is also safe inside an inline `<script>`.
fn script_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace("</", "<\\/")
}

pub fn page_count(candidates: usize, page_size: usize) -> usize {
    candidates.div_ceil(page_size.max(1)).max(1)
}

fn document(title: &str, head_extra: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{}</title>\
         <style>{STYLE}</style>{head_extra}</head><body>{body}</body></html>",
        html_escape(title)
    )
}

fn status_cell(status: EntryStatus) -> String {
    match status {
        EntryStatus::Pending => "pending".to_string(),
        EntryStatus::Selected { rank } => format!("selected #{rank}"),
        EntryStatus::Skipped => "skipped".to_string(),
    }
}

pub fn render_index(summary: &BatchSummary, current: Option<&EntityReview>) -> String {
    let mut body = format!(
        "<h1>Batch {}</h1><p>{}/{} resolved</p>",
        html_escape(&summary.batch_id),
        summary.resolved(),
        summary.entries.len()
    );
    match current {
        Some(review) => body.push_str(&format!(
            "<p><a href=\"/entity/{}\">Review {} ({}/{})</a></p>",
            review.entity.id,
            html_escape(review.entity.name.trim()),
            review.position,
            review.total
        )),
        None => body.push_str("<p>Waiting for the next entity&hellip;</p>"),
    }
    body.push_str("<table><tr><th>ID</th><th>Name</th><th>Status</th></tr>");
    for entry in &summary.entries {
        body.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            entry.entity_id,
            html_escape(&entry.name),
            status_cell(entry.status)
        ));
    }
    body.push_str("</table><p><a href=\"/submit\">Choices so far</a></p>");
    // Keeps the index current while the session prepares the next entity.
    document(
        &summary.batch_id,
        "<meta http-equiv=\"refresh\" content=\"5\">",
        &body,
    )
}

pub fn render_entity_page(review: &EntityReview, page: usize, page_size: usize) -> String {
    let page_size = page_size.max(1);
    let pages = page_count(review.candidates.len(), page_size);
    let page = page.clamp(1, pages);
    let entity = &review.entity;
    let key = storage_key(&review.batch_id, entity.id);

    let mut body = format!(
        "<h1>{} <small>({} &middot; {}/{})</small></h1>",
        html_escape(entity.name.trim()),
        html_escape(entity.category.display_name()),
        review.position,
        review.total
    );
    if let Some(alternate) = &entity.alternate_name {
        body.push_str(&format!("<p>Also known as {}</p>", html_escape(alternate)));
    }
    if let Some(biography) = &entity.biography {
        body.push_str(&format!("<p class=\"meta\">{}</p>", html_escape(biography)));
    }
    if review.unfiltered {
        body.push_str(
            "<p class=\"warn\">No candidate resembled the reference image; showing all downloads.</p>",
        );
    }

    body.push_str("<div class=\"grid\">");
    for staged in review
        .candidates
        .iter()
        .skip((page - 1) * page_size)
        .take(page_size)
    {
        let candidate = &staged.candidate;
        body.push_str(&format!(
            "<div class=\"card\"><h2>#{}</h2><img src=\"/staged/{}\" alt=\"{}\">\
             <p class=\"meta\">{}&times;{} &middot; ratio {:.3} &middot; score {:.3}<br>{}<br>{}</p></div>",
            staged.rank,
            html_escape(&staged.file_name()),
            html_escape(&candidate.title),
            candidate.width,
            candidate.height,
            candidate.aspect_ratio,
            candidate.score,
            html_escape(&candidate.title),
            html_escape(&staged.validation_note)
        ));
    }
    body.push_str("</div>");

    body.push_str("<p>");
    if page > 1 {
        body.push_str(&format!(
            "<a href=\"/entity/{}?page={}\">&larr; previous</a> ",
            entity.id,
            page - 1
        ));
    }
    body.push_str(&format!("page {page}/{pages}"));
    if page < pages {
        body.push_str(&format!(
            " <a href=\"/entity/{}?page={}\">next &rarr;</a>",
            entity.id,
            page + 1
        ));
    }
    body.push_str("</p>");

    body.push_str(&format!(
        "<form method=\"post\" action=\"/choose\">\
         <input type=\"hidden\" name=\"entity_id\" value=\"{}\">\
         <label>Choice (1-{}, 0 = skip, extra numbers after a comma are kept as alternates): \
         <input id=\"choice\" name=\"choice\" autofocus></label> \
         <button type=\"submit\">Submit</button></form>\
         <form method=\"post\" action=\"/abort\"><button type=\"submit\">Stop batch</button></form>\
         <script>\
         const key = {};\
         const input = document.getElementById(\"choice\");\
         input.value = localStorage.getItem(key) || \"\";\
         input.addEventListener(\"input\", () => localStorage.setItem(key, input.value));\
         input.form.addEventListener(\"submit\", () => localStorage.removeItem(key));\
         </script>",
        entity.id,
        review.max_rank(),
        script_string(&key)
    ));

    document(entity.name.trim(), "", &body)
}

pub fn render_submit_page(summary: &BatchSummary) -> String {
    let lines = summary.choice_lines();
    let body = format!(
        "<h1>Choices for {}</h1><p>{}/{} resolved</p><pre>{}</pre><p><a href=\"/\">Back</a></p>",
        html_escape(&summary.batch_id),
        summary.resolved(),
        summary.entries.len(),
        html_escape(&lines.join("\n"))
    );
    document(&summary.batch_id, "", &body)
}

/// Short status page; `redirect` sends the browser on after a second.
pub fn render_message_page(title: &str, message: &str, redirect: Option<&str>) -> String {
    let head = redirect
        .map(|target| {
            format!(
                "<meta http-equiv=\"refresh\" content=\"1;url={}\">",
                html_escape(target)
            )
        })
        .unwrap_or_default();
    let body = format!(
        "<h1>{}</h1><p>{}</p><p><a href=\"/\">Batch index</a></p>",
        html_escape(title),
        html_escape(message)
    );
    document(title, &head, &body)
}
