// src/services/digest.rs

//! HTML digest rendering.

use std::fmt::Write;

use crate::models::Post;
use crate::utils::html::escape;

/// Heading shown at the top of every digest.
pub const DIGEST_TITLE: &str = "New Reddit Posts Notification";

const CREATED_FORMAT: &str = "%b %-d, %Y %H:%M UTC";

/// A rendered digest ready for a notification sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub subject: String,
    pub html: String,
}

/// Build the subject line for a keyword.
pub fn subject(prefix: &str, keyword: &str) -> String {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        keyword.to_string()
    } else {
        format!("{prefix} {keyword}")
    }
}

/// Render posts (already in display order) into an HTML email.
pub fn render(subject_prefix: &str, keyword: &str, posts: &[Post]) -> Digest {
    let mut html = String::with_capacity(1024 + posts.len() * 512);
    html.push_str("<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>");
    html.push_str(&escape(DIGEST_TITLE));
    html.push_str("</title></head>\n<body style=\"font-family:sans-serif;\">\n");
    let _ = writeln!(html, "<h1>{}</h1>", escape(DIGEST_TITLE));
    let _ = writeln!(
        html,
        "<p>{} new posts for <strong>{}</strong></p>",
        posts.len(),
        escape(keyword)
    );

    for post in posts {
        render_post(&mut html, post);
    }

    html.push_str("</body>\n</html>\n");
    Digest {
        subject: subject(subject_prefix, keyword),
        html,
    }
}

fn render_post(html: &mut String, post: &Post) {
    let permalink = escape(&post.absolute_permalink());

    html.push_str("<div style=\"border:1px solid #ddd;padding:12px;margin:12px 0;\">\n");
    if let Some(thumbnail) = post.sanitized_thumbnail() {
        let _ = writeln!(
            html,
            "<img src=\"{}\" alt=\"\" style=\"max-width:140px;float:right;\">",
            escape(&thumbnail)
        );
    }
    let _ = writeln!(
        html,
        "<h2><a href=\"{}\">{}</a></h2>",
        permalink,
        escape(&post.title)
    );

    let _ = write!(html, "<p>r/{}", escape(&post.subreddit));
    if post.nsfw {
        html.push_str(" <span style=\"color:#c00;\">NSFW</span>");
    }
    if post.spoiler {
        html.push_str(" <span style=\"color:#666;\">Spoiler</span>");
    }
    html.push_str("</p>\n");

    let _ = writeln!(
        html,
        "<p>&#9650; {} &#9660; {} &middot; {}</p>",
        post.ups,
        post.downs,
        post.created_time().format(CREATED_FORMAT)
    );
    let _ = writeln!(html, "<p><a href=\"{permalink}\">{permalink}</a></p>");
    html.push_str("</div>\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sample_post;

    #[test]
    fn test_subject() {
        assert_eq!(subject("[digest]", "rust"), "[digest] rust");
        assert_eq!(subject("  ", "rust"), "rust");
    }

    #[test]
    fn test_render_escapes_and_formats() {
        let mut post = sample_post("p1", 1_136_214_240.0);
        post.title = "Tom & <Jerry>".into();
        post.nsfw = true;
        post.thumbnail = "http://i.example.com/a.png".into();

        let digest = render("[digest]", "rust", &[post]);

        assert_eq!(digest.subject, "[digest] rust");
        assert!(digest.html.contains("Tom &amp; &lt;Jerry&gt;"));
        assert!(digest.html.contains("Jan 2, 2006 15:04 UTC"));
        assert!(digest.html.contains("https://i.example.com/a.png"));
        assert!(digest.html.contains("NSFW"));
        assert!(!digest.html.contains("Spoiler"));
        assert!(digest.html.contains("https://www.reddit.com/r/golang/comments/p1/"));
    }

    #[test]
    fn test_render_keeps_order() {
        let posts = vec![sample_post("first", 10.0), sample_post("second", 20.0)];
        let html = render("", "rust", &posts).html;
        let first = html.find("comments/first").unwrap();
        let second = html.find("comments/second").unwrap();
        assert!(first < second);
    }
}
