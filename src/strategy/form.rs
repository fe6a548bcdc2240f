//! Form prober
//!
//! Listing forms on the site often expose result pages that no anchor links
//! to. Each form on the configured pages is submitted once with its default
//! values and then once per single-field variation: every select option
//! (up to a cap) and every checkbox flipped.

use crate::config::FormConfig;
use crate::crawler::PdfCandidate;
use crate::state::ExtractionMethod;
use crate::strategy::{
    fetch_html, pdf_links_in, DiscoveryStrategy, StrategyContext, StrategyOutput, StrategyResult,
    UrlFilter,
};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// An input of a parsed form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormField {
    /// Text-like input, hidden input or textarea, submitted with its default value
    Text { name: String, value: String },
    /// Select box with its option values in document order
    Select { name: String, options: Vec<String> },
    /// Checkbox or radio button
    Toggle {
        name: String,
        value: String,
        checked: bool,
    },
}

/// A form found on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSpec {
    pub action: Url,
    pub post: bool,
    pub fields: Vec<FormField>,
}

type Submission = Vec<(String, String)>;

impl FormSpec {
    /// Field values of the untouched form
    fn base_values(&self) -> Submission {
        let mut values = Vec::new();
        for field in &self.fields {
            match field {
                FormField::Text { name, value } => values.push((name.clone(), value.clone())),
                FormField::Select { name, options } => {
                    values.push((name.clone(), options.first().cloned().unwrap_or_default()))
                }
                FormField::Toggle {
                    name,
                    value,
                    checked: true,
                } => values.push((name.clone(), value.clone())),
                FormField::Toggle { .. } => {}
            }
        }
        values
    }

    /// The base submission followed by every single-field variation
    ///
    /// Duplicates are dropped, so the first option of a select does not
    /// produce a second copy of the base submission.
    pub fn submissions(&self, max_options_per_select: usize) -> Vec<Submission> {
        let base = self.base_values();
        let mut submissions = vec![base.clone()];

        for field in &self.fields {
            match field {
                FormField::Select { name, options } => {
                    for option in options.iter().take(max_options_per_select) {
                        let variant = base
                            .iter()
                            .map(|(k, v)| {
                                if k == name {
                                    (k.clone(), option.clone())
                                } else {
                                    (k.clone(), v.clone())
                                }
                            })
                            .collect();
                        push_unique(&mut submissions, variant);
                    }
                }
                FormField::Toggle {
                    name,
                    value,
                    checked,
                } => {
                    let variant = if *checked {
                        base.iter()
                            .filter(|(k, v)| !(k == name && v == value))
                            .cloned()
                            .collect()
                    } else {
                        let mut with = base.clone();
                        with.push((name.clone(), value.clone()));
                        with
                    };
                    push_unique(&mut submissions, variant);
                }
                FormField::Text { .. } => {}
            }
        }

        submissions
    }
}

fn push_unique(submissions: &mut Vec<Submission>, candidate: Submission) {
    if !submissions.contains(&candidate) {
        submissions.push(candidate);
    }
}

fn field_of(element: ElementRef<'_>, option_selector: &Selector) -> Option<FormField> {
    let attrs = element.value();
    let name = attrs.attr("name")?.to_string();

    match attrs.name() {
        "select" => {
            let options = element
                .select(option_selector)
                .filter_map(|opt| {
                    let value = opt
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| opt.text().collect::<String>().trim().to_string());
                    (!value.is_empty()).then_some(value)
                })
                .collect();
            Some(FormField::Select { name, options })
        }
        "textarea" => Some(FormField::Text {
            name,
            value: element.text().collect(),
        }),
        _ => {
            let kind = attrs.attr("type").unwrap_or("text").to_ascii_lowercase();
            let value = attrs.attr("value").unwrap_or_default().to_string();
            match kind.as_str() {
                "submit" | "button" | "reset" | "image" | "file" => None,
                "checkbox" | "radio" => Some(FormField::Toggle {
                    name,
                    value: if value.is_empty() {
                        "on".to_string()
                    } else {
                        value
                    },
                    checked: attrs.attr("checked").is_some(),
                }),
                _ => Some(FormField::Text { name, value }),
            }
        }
    }
}

/// Parses the forms matching `form_selector`
///
/// A missing action submits to the page itself; a missing method means GET.
pub fn parse_forms(html: &str, page: &Url, form_selector: &Selector) -> Vec<FormSpec> {
    let document = Html::parse_document(html);
    let (Ok(inputs), Ok(options)) = (
        Selector::parse("input, select, textarea"),
        Selector::parse("option"),
    ) else {
        return Vec::new();
    };

    document
        .select(form_selector)
        .filter_map(|form| {
            let action = match form.value().attr("action").map(str::trim) {
                Some(a) if !a.is_empty() => page.join(a).ok()?,
                _ => page.clone(),
            };
            let post = form
                .value()
                .attr("method")
                .map(|m| m.eq_ignore_ascii_case("post"))
                .unwrap_or(false);
            let fields = form
                .select(&inputs)
                .filter_map(|el| field_of(el, &options))
                .collect();
            Some(FormSpec {
                action,
                post,
                fields,
            })
        })
        .collect()
}

/// Submits forms found on the configured pages
pub struct FormProber {
    config: FormConfig,
    form_selector: Option<Selector>,
    filter: UrlFilter,
}

impl FormProber {
    pub fn new(config: FormConfig) -> Self {
        Self {
            config,
            form_selector: None,
            filter: UrlFilter::default(),
        }
    }
}

#[async_trait]
impl DiscoveryStrategy for FormProber {
    fn name(&self) -> &'static str {
        "forms"
    }

    fn enabled(&self) -> bool {
        self.config.enabled && !self.config.seed_pages.is_empty()
    }

    async fn initialize(&mut self, _ctx: &StrategyContext) -> StrategyResult<()> {
        self.filter = UrlFilter::new(&self.config.include, &self.config.exclude)?;
        self.form_selector = Selector::parse(&self.config.form_selector).ok();
        if self.form_selector.is_none() {
            tracing::warn!(
                "Invalid form selector {:?}; falling back to \"form\"",
                self.config.form_selector
            );
            self.form_selector = Selector::parse("form").ok();
        }
        Ok(())
    }

    async fn discover(&mut self, ctx: &StrategyContext) -> StrategyResult<StrategyOutput> {
        let mut output = StrategyOutput::default();
        let Some(form_selector) = self.form_selector.clone() else {
            return Ok(output);
        };
        let mut seen = HashSet::new();
        let mut submitted = 0usize;
        let mut forms_found = 0usize;

        'pages: for page in &self.config.seed_pages {
            let page_url = ctx.resolve(page)?;
            let html = match fetch_html(ctx, &page_url).await {
                Ok(html) => html,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!("Form page {} unavailable: {}", page_url, e);
                    continue;
                }
            };

            for form in parse_forms(&html, &page_url, &form_selector) {
                forms_found += 1;
                for values in form.submissions(self.config.max_options_per_select) {
                    if submitted >= self.config.max_combinations {
                        break 'pages;
                    }
                    submitted += 1;

                    let result = if form.post {
                        ctx.post_form(&form.action, values).await
                    } else {
                        let mut target = form.action.clone();
                        target.query_pairs_mut().clear().extend_pairs(&values);
                        ctx.get(&target).await
                    };
                    let response = match result {
                        Ok(response) if response.is_success() => response,
                        Ok(response) => {
                            tracing::debug!("Form {} returned HTTP {}", form.action, response.status);
                            continue;
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            tracing::debug!("Form {} submission failed: {}", form.action, e);
                            continue;
                        }
                    };

                    let base = Url::parse(&response.final_url).unwrap_or_else(|_| form.action.clone());
                    for (url, confidence) in pdf_links_in(&response.body, &base) {
                        if self.filter.allows(&url) && seen.insert(url.clone()) {
                            output.pdf_links.push(
                                PdfCandidate::new(
                                    url,
                                    Some(form.action.to_string()),
                                    ExtractionMethod::FormSubmission,
                                    confidence,
                                )
                                .with_meta("strategy", "forms"),
                            );
                        }
                    }
                }
            }
        }

        tracing::info!(
            "Form prober submitted {} combinations over {} forms and found {} PDF links",
            submitted,
            forms_found,
            output.pdf_links.len()
        );
        output.metadata = serde_json::json!({
            "forms": forms_found,
            "submissions": submitted,
            "pdfs": output.pdf_links.len(),
        });
        Ok(output)
    }
}
