use sqlx::PgPool;

use crate::models::course::Course;
use crate::models::template::NotificationConfig;
use crate::models::user::User;

#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Assembles the outgoing message from the merged configuration: header,
/// static body and footer blocks, plus the linked dynamic module's intro.
/// Placeholder substitution is a collaborator concern and not done here.
pub struct ContentRenderer;

impl ContentRenderer {
    pub async fn render(
        pool: &PgPool,
        config: &NotificationConfig,
        user: &User,
        course: &Course,
    ) -> anyhow::Result<RenderedMessage> {
        let subject = if config.subject.is_empty() {
            course.fullname.clone()
        } else {
            config.subject.clone()
        };

        let mut blocks: Vec<String> = Vec::new();
        blocks.push(format!(
            r#"<p style="margin:0;font-size:15px;color:#64748b">Hello <strong style="color:#334155">{}</strong>,</p>"#,
            user.first_name
        ));
        if !config.header_content.is_empty() {
            blocks.push(config.header_content.clone());
        }
        if !config.static_content.is_empty() {
            blocks.push(config.static_content.clone());
        }

        if let Some(module_id) = config.dynamic_module {
            let intro: Option<Option<String>> = sqlx::query_scalar(
                "SELECT intro FROM course_modules WHERE id = $1 AND course_id = $2",
            )
            .bind(module_id)
            .bind(course.id)
            .fetch_optional(pool)
            .await?;
            if let Some(Some(intro)) = intro {
                if !intro.is_empty() {
                    blocks.push(intro);
                }
            }
        }

        if !config.footer_content.is_empty() {
            blocks.push(config.footer_content.clone());
        }

        let inner = blocks
            .iter()
            .map(|b| format!(r#"<div style="margin:0 0 16px 0">{b}</div>"#))
            .collect::<Vec<_>>()
            .join("\n");
        let html = Self::wrap_html(&course.fullname, &inner);

        let text = blocks
            .iter()
            .map(|b| strip_tags(b))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(RenderedMessage {
            subject,
            text,
            html,
        })
    }

    /// Wraps inner HTML content in a consistent branded email layout with the
    /// course name as the header.
    fn wrap_html(course_name: &str, content: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width,initial-scale=1">
  <title>{course_name}</title>
</head>
<body style="margin:0;padding:0;background-color:#f1f5f9;font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,Helvetica,Arial,sans-serif">
  <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background-color:#f1f5f9;padding:40px 16px">
    <tr>
      <td align="center">
        <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="max-width:560px">
          <tr>
            <td align="center" style="padding-bottom:24px">
              <p style="margin:0;font-size:20px;font-weight:700;color:#0f172a;text-align:center">{course_name}</p>
            </td>
          </tr>
          <tr>
            <td style="background:#ffffff;border-radius:12px;padding:36px;box-shadow:0 1px 3px rgba(0,0,0,0.08),0 8px 24px rgba(0,0,0,0.04)">
              {content}
            </td>
          </tr>
          <tr>
            <td align="center" style="padding-top:20px">
              <p style="margin:0;font-size:12px;color:#94a3b8">{course_name}</p>
            </td>
          </tr>
        </table>
      </td>
    </tr>
  </table>
</body>
</html>"#
        )
    }
}

/// Crude tag removal for the plain-text alternative part.
fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_tags_keeps_text() {
        assert_eq!(
            strip_tags("<p>Hello <strong>there</strong></p>"),
            "Hello there"
        );
        assert_eq!(strip_tags("no markup"), "no markup");
    }
}
