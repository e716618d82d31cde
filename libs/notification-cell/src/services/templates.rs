use chrono::{DateTime, FixedOffset, Utc};

use crate::models::EmailMessage;

const CLINIC_NAME: &str = "AL-BOQAI Center - Physical Therapy & Rehabilitation";

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body style=\"font-family: Arial, sans-serif; color: #333;\">\
         <div style=\"max-width: 600px; margin: 0 auto; padding: 20px;\">\
         <h1>{title}</h1>{body}\
         <p style=\"color: #666; font-size: 14px;\">{CLINIC_NAME}<br>This is an automated email, please do not reply.</p>\
         </div></body></html>"
    )
}

/// Booking details rendered into a confirmation email.
pub struct BookingSummary<'a> {
    pub recipient_name: &'a str,
    pub service_label: &'a str,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub guest_id: Option<&'a str>,
}

/// Builds the clinic's outbound emails. Links point at the public web app.
#[derive(Debug, Clone)]
pub struct EmailTemplates {
    public_app_url: String,
    clinic_offset: FixedOffset,
}

impl EmailTemplates {
    pub fn new(public_app_url: &str, clinic_offset: FixedOffset) -> Self {
        Self {
            public_app_url: public_app_url.trim_end_matches('/').to_string(),
            clinic_offset,
        }
    }

    fn link(&self, path: &str, token: &str) -> String {
        format!("{}{}?token={}", self.public_app_url, path, token)
    }

    pub fn booking_confirmation(&self, to: &str, summary: &BookingSummary<'_>) -> EmailMessage {
        let local = summary.scheduled_at.with_timezone(&self.clinic_offset);
        let guest_line = summary
            .guest_id
            .map(|id| {
                format!(
                    "<p>Your guest reference is <strong>{}</strong>. Keep it together with this email address to look up or update your booking.</p>",
                    escape_html(id)
                )
            })
            .unwrap_or_default();

        let body = format!(
            "<p>Hello {name},</p>\
             <p>Your <strong>{service}</strong> appointment is booked for {date} at {time} ({duration} minutes).</p>\
             {guest_line}\
             <p>If you need to change it, please contact us or reschedule from your account.</p>",
            name = escape_html(summary.recipient_name),
            service = escape_html(summary.service_label),
            date = local.format("%A, %d %B %Y"),
            time = local.format("%H:%M"),
            duration = summary.duration_minutes,
        );

        EmailMessage::new(
            to,
            format!("Appointment confirmed - {}", local.format("%d %b %Y %H:%M")),
            layout("Appointment Confirmed", &body),
        )
    }

    pub fn registration_verification(&self, to: &str, name: &str, token: &str, code: &str, expiry_hours: i64) -> EmailMessage {
        let link = self.link("/verify-email", token);
        let body = format!(
            "<p>Hello {name},</p>\
             <p>Welcome! Confirm your email address with this code:</p>\
             <p style=\"font-size: 28px; letter-spacing: 4px;\"><strong>{code}</strong></p>\
             <p>Or open this link: <a href=\"{link}\">{link}</a></p>\
             <p>The code expires in {expiry_hours} hours.</p>",
            name = escape_html(name),
        );
        EmailMessage::new(to, "Verify your email address", layout("Verify Your Email", &body))
    }

    pub fn password_reset(&self, to: &str, name: &str, token: &str, code: &str, expiry_hours: i64) -> EmailMessage {
        let link = self.link("/reset-password", token);
        let body = format!(
            "<p>Hello {name},</p>\
             <p>We received a request to reset your password. If you didn't make this request, you can safely ignore this email.</p>\
             <p>Your reset code is <strong>{code}</strong>, or use this link: <a href=\"{link}\">{link}</a></p>\
             <p>This code will expire in {expiry_hours} hours for security reasons.</p>",
            name = escape_html(name),
        );
        EmailMessage::new(to, "Password reset request", layout("Password Reset Request", &body))
    }

    pub fn password_reset_confirmation(&self, to: &str, name: &str) -> EmailMessage {
        let body = format!(
            "<p>Hello {name},</p>\
             <p>Your password has been successfully reset. You can now log in with your new password.</p>\
             <p>If you didn't request this change, please contact our support team immediately.</p>",
            name = escape_html(name),
        );
        EmailMessage::new(to, "Your password was reset", layout("Password Reset Successful", &body))
    }

    pub fn email_change(&self, to: &str, name: &str, token: &str, code: &str, expiry_hours: i64) -> EmailMessage {
        let link = self.link("/confirm-email-change", token);
        let body = format!(
            "<p>Hello {name},</p>\
             <p>Confirm that this address should become the email for your account with code <strong>{code}</strong>.</p>\
             <p>Or open this link: <a href=\"{link}\">{link}</a></p>\
             <p>The code expires in {expiry_hours} hours. Your current address stays active until you confirm.</p>",
            name = escape_html(name),
        );
        EmailMessage::new(to, "Confirm your new email address", layout("Confirm Email Change", &body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn booking_confirmation_uses_clinic_local_time_and_escapes_names() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let templates = EmailTemplates::new("https://clinic.test/", offset);
        let summary = BookingSummary {
            recipient_name: "<Ann>",
            service_label: "Consultation",
            scheduled_at: Utc.with_ymd_and_hms(2030, 1, 2, 8, 0, 0).unwrap(),
            duration_minutes: 60,
            guest_id: Some("GUEST-20300102-001"),
        };

        let message = templates.booking_confirmation("a@b.com", &summary);
        assert!(message.html_body.contains("10:00"));
        assert!(message.html_body.contains("&lt;Ann&gt;"));
        assert!(message.html_body.contains("GUEST-20300102-001"));
    }

    #[test]
    fn verification_link_carries_token() {
        let templates = EmailTemplates::new("https://clinic.test", FixedOffset::east_opt(0).unwrap());
        let message = templates.registration_verification("a@b.com", "Ann", "tok", "123456", 24);
        assert!(message.html_body.contains("https://clinic.test/verify-email?token=tok"));
        assert!(message.html_body.contains("123456"));
    }
}
