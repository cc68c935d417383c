//! GLPI web session client.
//!
//! HTTP port of the old browser flow: form login with the CSRF token,
//! ticket list scrape, per-ticket detail page, inline image download,
//! logout. The session is a cookie-holding `reqwest::Client`; dropping
//! it is what "closing" means, plus a best-effort logout request so the
//! portal frees the server side too.
//!
//! All HTML digging lives in pure helpers over `&str` so they can be
//! exercised against fixtures without a portal.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use tracing::{debug, info};

use vigia_core::source::{SourceError, TicketSource};
use vigia_core::ticket::{RawTicket, TicketDetail};

use crate::config::{Credentials, GlpiConfig};

/// Ticket list page. Used for login (GLPI bounces anonymous visitors
/// to the form and back here afterwards), for the liveness probe and
/// for scraping.
const TICKET_PAGE: &str = "/front/ticket.php";
const LOGOUT_PAGE: &str = "/front/logout.php";

/// Anchors the portal renders for each ticket title in the list view.
const TICKET_ANCHOR_SELECTOR: &str = r#"a[id^="Ticket"][data-hasqtip]"#;

/// Category cells carry a `Parent > Child` breadcrumb.
const CATEGORY_CELL_SELECTOR: &str = r#"td[valign="top"]"#;

/// Containers the ticket description has lived in across GLPI themes,
/// most specific first.
const DESCRIPTION_SELECTORS: &[&str] = &[
    ".timeline_content .rich_text_container",
    ".timeline_content",
    "div.b_right",
];

/// GLPI status id for tickets waiting on a third party.
const STATUS_WAITING: &str = "4";

pub struct GlpiClient {
    base_url: String,
    user: String,
    pass: String,
    timeout: Duration,
    image_dir: PathBuf,
    /// Cookie-holding HTTP client. `Some` while a session is open.
    session: Option<reqwest::Client>,
}

impl GlpiClient {
    pub fn new(
        glpi: &GlpiConfig,
        credentials: &Credentials,
        timeout: Duration,
        image_dir: PathBuf,
    ) -> Self {
        Self {
            base_url: glpi.base_url.trim_end_matches('/').to_string(),
            user: credentials.glpi_user.clone(),
            pass: credentials.glpi_pass.clone(),
            timeout,
            image_dir,
            session: None,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn build_client(&self) -> Result<reqwest::Client, SourceError> {
        reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.timeout)
            .user_agent(concat!("vigiad/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))
    }

    fn session_ref(&self) -> Result<&reqwest::Client, SourceError> {
        self.session.as_ref().ok_or(SourceError::SessionExpired)
    }
}

#[async_trait]
impl TicketSource for GlpiClient {
    async fn establish_session(&mut self) -> Result<(), SourceError> {
        self.session = None;
        let http = self.build_client()?;

        debug!("Fetching login form from {}", self.base_url);
        let response = http
            .get(self.url(TICKET_PAGE))
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        let html = response
            .text()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        let form = parse_login_form(&html)?;

        let mut fields = form.hidden;
        fields.push((form.user_field, self.user.clone()));
        fields.push((form.pass_field, self.pass.clone()));

        let action = absolute_url(&self.base_url, &form.action);
        debug!("Posting credentials to {action}");
        http.post(&action)
            .form(&fields)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        // A failed login renders the form again, so confirm we can
        // actually reach the ticket list.
        let check = http
            .get(self.url(TICKET_PAGE))
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        if bounced_to_login(check.url().as_str()) {
            return Err(SourceError::Auth(
                "credentials rejected by the portal".to_string(),
            ));
        }

        info!("Authenticated to GLPI as {}", self.user);
        self.session = Some(http);
        Ok(())
    }

    fn has_session(&self) -> bool {
        self.session.is_some()
    }

    async fn is_session_alive(&self) -> bool {
        let Some(http) = self.session.as_ref() else {
            return false;
        };
        match http.get(self.url(TICKET_PAGE)).send().await {
            Ok(response) => {
                response.status().is_success() && !bounced_to_login(response.url().as_str())
            }
            Err(e) => {
                debug!("Session probe failed: {e}");
                false
            }
        }
    }

    async fn fetch_tickets(&self) -> Result<Vec<RawTicket>, SourceError> {
        let http = self.session_ref()?;
        let response = http
            .get(self.url(TICKET_PAGE))
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        if bounced_to_login(response.url().as_str()) {
            return Err(SourceError::SessionExpired);
        }
        let html = response
            .text()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;
        parse_ticket_rows(&html, &self.base_url)
    }

    async fn fetch_detail(&self, ticket: &RawTicket) -> Result<TicketDetail, SourceError> {
        let ticket_err = |reason: String| SourceError::Ticket {
            id: ticket.identifier().to_string(),
            reason,
        };

        let http = self.session_ref()?;
        let response = http
            .get(&ticket.link)
            .send()
            .await
            .map_err(|e| ticket_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ticket_err(format!("HTTP {}", response.status())));
        }
        let html = response.text().await.map_err(|e| ticket_err(e.to_string()))?;
        parse_ticket_detail(&html, &self.base_url).map_err(|e| ticket_err(e.to_string()))
    }

    async fn download_image(&self, reference: &str) -> Result<PathBuf, SourceError> {
        let image_err = |reason: String| SourceError::Image {
            reference: reference.to_string(),
            reason,
        };

        let http = self.session_ref()?;
        let response = http
            .get(reference)
            .send()
            .await
            .map_err(|e| image_err(e.to_string()))?;
        if !response.status().is_success() {
            return Err(image_err(format!("HTTP {}", response.status())));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| image_err(e.to_string()))?;

        std::fs::create_dir_all(&self.image_dir).map_err(|e| image_err(e.to_string()))?;
        let path = self
            .image_dir
            .join(image_file_name(reference, content_type.as_deref()));
        std::fs::write(&path, &bytes).map_err(|e| image_err(e.to_string()))?;
        debug!("Downloaded {} to {}", reference, path.display());
        Ok(path)
    }

    async fn close_session(&mut self) {
        if let Some(http) = self.session.take() {
            if let Err(e) = http.get(self.url(LOGOUT_PAGE)).send().await {
                debug!("Logout request failed: {e}");
            }
        }
    }
}

/// Form state needed to post the login form back.
#[derive(Debug)]
struct LoginForm {
    action: String,
    user_field: String,
    pass_field: String,
    /// Hidden inputs, CSRF token included.
    hidden: Vec<(String, String)>,
}

fn sel(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Parse(format!("bad selector {css}: {e}")))
}

fn parse_login_form(html: &str) -> Result<LoginForm, SourceError> {
    let document = Html::parse_document(html);

    let form_selector = sel("form")?;
    let user_selector = sel("input#login_name")?;
    let pass_selector = sel("input#login_password")?;
    let hidden_selector = sel(r#"input[type="hidden"]"#)?;

    for form in document.select(&form_selector) {
        let Some(user_input) = form.select(&user_selector).next() else {
            continue;
        };
        let Some(pass_input) = form.select(&pass_selector).next() else {
            continue;
        };

        let hidden = form
            .select(&hidden_selector)
            .filter_map(|input| {
                let name = input.value().attr("name")?;
                let value = input.value().attr("value").unwrap_or_default();
                Some((name.to_string(), value.to_string()))
            })
            .collect();

        return Ok(LoginForm {
            action: form
                .value()
                .attr("action")
                .unwrap_or("/front/login.php")
                .to_string(),
            user_field: user_input
                .value()
                .attr("name")
                .unwrap_or("login_name")
                .to_string(),
            pass_field: pass_input
                .value()
                .attr("name")
                .unwrap_or("login_password")
                .to_string(),
            hidden,
        });
    }

    Err(SourceError::Parse(
        "no login form on the page".to_string(),
    ))
}

/// Session death shows up as a redirect back to the login form.
fn bounced_to_login(url: &str) -> bool {
    let url = url.to_lowercase();
    url.contains("login") || !url.contains("ticket.php")
}

fn parse_ticket_rows(html: &str, base_url: &str) -> Result<Vec<RawTicket>, SourceError> {
    let document = Html::parse_document(html);
    let anchor_selector = sel(TICKET_ANCHOR_SELECTOR)?;
    let category_selector = sel(CATEGORY_CELL_SELECTOR)?;

    let categories: Vec<String> = document
        .select(&category_selector)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .filter(|text| text.contains('>'))
        .collect();

    let mut tickets = Vec::new();
    for (index, anchor) in document.select(&anchor_selector).enumerate() {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let link = absolute_url(base_url, href);
        tickets.push(RawTicket {
            id: ticket_id_from_link(&link),
            title: anchor.text().collect::<String>().trim().to_string(),
            category: categories.get(index).cloned().unwrap_or_default(),
            link,
        });
    }
    Ok(tickets)
}

/// Pull the numeric id out of a `ticket.form.php?id=4821` style link.
fn ticket_id_from_link(link: &str) -> Option<String> {
    let (_, query) = link.split_once('?')?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("id=") {
            let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                return Some(digits);
            }
        }
    }
    None
}

fn parse_ticket_detail(html: &str, base_url: &str) -> Result<TicketDetail, SourceError> {
    let document = Html::parse_document(html);

    let mut description = String::new();
    let mut image_refs = Vec::new();
    let image_selector = sel("img")?;
    for css in DESCRIPTION_SELECTORS {
        let selector = sel(css)?;
        if let Some(container) = document.select(&selector).next() {
            description = html_to_text(&container.html());
            image_refs = container
                .select(&image_selector)
                .filter_map(|img| img.value().attr("src"))
                .filter(|src| !src.starts_with("data:"))
                .map(|src| absolute_url(base_url, src))
                .collect();
            break;
        }
    }

    Ok(TicketDetail {
        description,
        image_refs,
        is_pending: detect_pending(&document)?,
    })
}

fn detect_pending(document: &Html) -> Result<bool, SourceError> {
    let option_selector = sel(r#"select[name="status"] option[selected]"#)?;
    if let Some(option) = document.select(&option_selector).next() {
        return Ok(option.value().attr("value") == Some(STATUS_WAITING));
    }

    // Older themes render the status as a titled icon instead.
    let icon_selector = sel(".status")?;
    for icon in document.select(&icon_selector) {
        let label = icon
            .value()
            .attr("title")
            .or_else(|| icon.value().attr("alt"))
            .unwrap_or_default()
            .to_lowercase();
        if label.contains("pendente") || label.contains("waiting") {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Flatten an HTML fragment to readable plain text, dropping blank
/// lines and layout noise.
fn html_to_text(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 200);
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn absolute_url(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}/{}", base, href.trim_start_matches('/'))
    }
}

/// Stable file name for a downloaded image, extension taken from the
/// Content-Type when the server sends one.
fn image_file_name(reference: &str, content_type: Option<&str>) -> String {
    let mut hasher = DefaultHasher::new();
    reference.hash(&mut hasher);
    format!("img_{:016x}.{}", hasher.finish(), image_extension(content_type, reference))
}

fn image_extension(content_type: Option<&str>, reference: &str) -> String {
    let mime = content_type
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim();
    match mime {
        "image/png" => return "png".to_string(),
        "image/jpeg" => return "jpg".to_string(),
        "image/gif" => return "gif".to_string(),
        "image/webp" => return "webp".to_string(),
        _ => {}
    }
    // The URL path only helps when it names an actual image file. GLPI
    // serves inline documents through document.send.php, so a script
    // suffix must not become the extension.
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    if let Some((_, ext)) = path.rsplit_once('.') {
        let ext = ext.to_lowercase();
        if matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "gif" | "webp") {
            return ext;
        }
    }
    "png".to_string()
}
