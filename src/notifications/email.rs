//! Account emails: confirmation and password reset links.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use super::{Mailer, OutgoingEmail};
use crate::config::{EmailConfig, ServerConfig};
use crate::db::Account;

pub const CONFIRMATION_SUBJECT: &str = "Account Confirmation";
pub const PASSWORD_RESET_SUBJECT: &str = "Password Reset";

/// Composes account emails and hands them to the configured mailer
#[derive(Clone)]
pub struct AccountEmails {
    mailer: Arc<dyn Mailer>,
    from: String,
    public_url: String,
}

impl AccountEmails {
    pub fn new(mailer: Arc<dyn Mailer>, email: &EmailConfig, server: &ServerConfig) -> Self {
        Self {
            mailer,
            from: format!("{} <{}>", email.from_name, email.from_address),
            public_url: server.public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn confirmation_url(&self, username: &str, token: &str) -> String {
        format!("{}/api/auth/confirm/{}/{}", self.public_url, username, token)
    }

    pub fn password_reset_url(&self, username: &str, token: &str) -> String {
        format!("{}/api/auth/password_reset/{}/{}", self.public_url, username, token)
    }

    pub async fn send_confirmation(
        &self,
        account: &Account,
        token: &str,
        valid_for: Duration,
    ) -> Result<()> {
        let url = self.confirmation_url(&account.username, token);
        let minutes = (valid_for.as_secs() / 60).max(1);

        let email = OutgoingEmail {
            from: self.from.clone(),
            to: account.email.clone(),
            subject: CONFIRMATION_SUBJECT.to_string(),
            text_body: render_confirmation_text(&url, minutes),
            html_body: render_confirmation_html(&account.first_name, &url, minutes),
        };

        self.mailer.send(&email).await
    }

    pub async fn send_password_reset(&self, account: &Account, token: &str) -> Result<()> {
        let url = self.password_reset_url(&account.username, token);

        let email = OutgoingEmail {
            from: self.from.clone(),
            to: account.email.clone(),
            subject: PASSWORD_RESET_SUBJECT.to_string(),
            text_body: render_password_reset_text(&url),
            html_body: render_password_reset_html(&account.first_name, &url),
        };

        self.mailer.send(&email).await
    }
}

fn render_confirmation_text(url: &str, minutes: u64) -> String {
    format!(
        r#"Hello!

We have received your request to create an account. Follow the link below to confirm it:

{url}

The link will be valid for {minutes} minutes. If you do not confirm the account within that time you will have to register again.

If you did not request this account, you can ignore this message."#
    )
}

fn render_confirmation_html(first_name: &str, url: &str, minutes: u64) -> String {
    render_html_layout(
        "Account Confirmation",
        &format!(
            r#"<p>Hello {name}!</p>
                <p>We have received your request to create an account. Confirm it with the button below.</p>
                <div class="button-container">
                    <a href="{url}" class="button">Confirm Account</a>
                </div>
                <p class="note">The link will be valid for {minutes} minutes. If you do not confirm the account within that time you will have to register again. If you did not request this account, you can ignore this message.</p>"#,
            name = html_escape(first_name),
            url = html_escape(url),
            minutes = minutes,
        ),
    )
}

fn render_password_reset_text(url: &str) -> String {
    format!(
        r#"Hello!

We have received your request to reset the password of your account. Follow the link below to choose a new one:

{url}

If you did not request the change, you can ignore this message."#
    )
}

fn render_password_reset_html(first_name: &str, url: &str) -> String {
    render_html_layout(
        "Password Reset",
        &format!(
            r#"<p>Hello {name}!</p>
                <p>We have received your request to reset the password of your account.</p>
                <div class="button-container">
                    <a href="{url}" class="button">Choose a New Password</a>
                </div>
                <p class="note">If you did not request the change, you can ignore this message.</p>"#,
            name = html_escape(first_name),
            url = html_escape(url),
        ),
    )
}

fn render_html_layout(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, 'Helvetica Neue', Arial, sans-serif;
            margin: 0;
            padding: 0;
            background-color: #f5f5f5;
        }}
        .container {{
            max-width: 560px;
            margin: 0 auto;
            padding: 40px 20px;
        }}
        .card {{
            background-color: #ffffff;
            border-radius: 8px;
            box-shadow: 0 2px 8px rgba(0, 0, 0, 0.06);
            overflow: hidden;
        }}
        .header {{
            background: #2563eb;
            color: white;
            padding: 32px 24px;
            text-align: center;
        }}
        .header h1 {{
            margin: 0;
            font-size: 24px;
            font-weight: 600;
        }}
        .content {{
            padding: 32px 24px;
            color: #374151;
            line-height: 1.6;
        }}
        .button-container {{
            text-align: center;
            margin: 32px 0;
        }}
        .button {{
            display: inline-block;
            background: #2563eb;
            color: white !important;
            text-decoration: none;
            padding: 14px 32px;
            border-radius: 6px;
            font-weight: 500;
        }}
        .note {{
            color: #6b7280;
            font-size: 13px;
            text-align: center;
        }}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <div class="header">
                <h1>{title}</h1>
            </div>
            <div class="content">
                {content}
            </div>
        </div>
    </div>
</body>
</html>"#,
        title = html_escape(title),
        content = content,
    )
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
