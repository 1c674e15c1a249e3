//! The public application form of one visitor.
//!
//! The form keeps its draft between requests, writes one record per successful submission
//! and shows a success banner that hides itself after a while.

use core::time::Duration;
use std::sync::{Arc, Mutex, PoisonError};

use applicant_intake_store::{Application, Course, RecordId, RecordStore, StoreError, STUDENTS};
use rand::rngs::StdRng;
use rand::SeedableRng as _;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// How many ids are drawn before giving up on finding a free one.
pub const MAX_ID_ATTEMPTS: usize = 16;

pub const SUBMIT_FAILURE: &str = "Your application could not be submitted. Please try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    Name,
    Email,
    Phone,
    Course,
    Message,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub course: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FieldErrors {
    pub name: Option<&'static str>,
    pub email: Option<&'static str>,
    pub phone: Option<&'static str>,
    pub course: Option<&'static str>,
}

impl FieldErrors {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.phone.is_none() && self.course.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FormState {
    pub draft: Draft,
    /// Set after a successful submission until the banner timer fires.
    pub submitted: bool,
    pub failure: Option<String>,
    pub errors: FieldErrors,
}

#[derive(thiserror::Error, Debug)]
pub enum SubmitError {
    #[error("the application is incomplete")]
    Invalid(FieldErrors),
    #[error("no free application id after {MAX_ID_ATTEMPTS} attempts")]
    IdSpaceExhausted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn required(value: &str) -> Option<&'static str> {
    value.trim().is_empty().then_some("This field is required.")
}

fn looks_like_email(value: &str) -> bool {
    value.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !value.contains(' ')
    })
}

/// Checks what the browser would have checked, and that the course is one we offer.
pub fn validate(draft: &Draft) -> Result<Course, FieldErrors> {
    let course = draft.course.trim().parse::<Course>();
    let errors = FieldErrors {
        name: required(&draft.name),
        email: required(&draft.email).or_else(|| {
            (!looks_like_email(draft.email.trim())).then_some("Please enter a valid email address.")
        }),
        phone: required(&draft.phone),
        course: required(&draft.course)
            .or_else(|| course.is_err().then_some("Please select one of the offered courses.")),
    };
    match course {
        Ok(course) if errors.is_empty() => Ok(course),
        _ => Err(errors),
    }
}

pub struct ApplicationForm {
    store: Arc<dyn RecordStore>,
    state: Arc<watch::Sender<FormState>>,
    banner: Duration,
    rng: Mutex<StdRng>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ApplicationForm {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, banner: Duration) -> Self {
        Self::with_rng(store, banner, StdRng::from_entropy())
    }

    #[must_use]
    pub fn with_rng(store: Arc<dyn RecordStore>, banner: Duration, rng: StdRng) -> Self {
        Self {
            store,
            state: Arc::new(watch::channel(FormState::default()).0),
            banner,
            rng: Mutex::new(rng),
            timer: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> FormState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<FormState> {
        self.state.subscribe()
    }

    pub fn set_field(&self, field: Field, value: String) {
        self.state.send_modify(|state| {
            let draft = &mut state.draft;
            match field {
                Field::Name => draft.name = value,
                Field::Email => draft.email = value,
                Field::Phone => draft.phone = value,
                Field::Course => draft.course = value,
                Field::Message => draft.message = value,
            }
        });
    }

    /// Replaces every field of the draft, as a posted form does.
    pub fn set_draft(&self, draft: Draft) {
        let Draft {
            name,
            email,
            phone,
            course,
            message,
        } = draft;
        self.set_field(Field::Name, name);
        self.set_field(Field::Email, email);
        self.set_field(Field::Phone, phone);
        self.set_field(Field::Course, course);
        self.set_field(Field::Message, message);
    }

    async fn fresh_id(&self) -> Result<RecordId, SubmitError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = RecordId::generate(&mut *self.rng.lock().unwrap_or_else(PoisonError::into_inner));
            // another submission can still take the id between this check and our write
            if !self.store.exists(STUDENTS, &id).await? {
                return Ok(id);
            }
            debug!("application id {id} is taken, drawing another one");
        }
        Err(SubmitError::IdSpaceExhausted)
    }

    /// Validates the draft and writes it as a new application.
    ///
    /// On success the draft is cleared and the success banner is shown. On failure the draft
    /// is left as it was and the failure is reflected in the form state.
    pub async fn submit(&self) -> Result<RecordId, SubmitError> {
        let draft = self.state.borrow().draft.clone();
        let course = match validate(&draft) {
            Ok(course) => course,
            Err(errors) => {
                self.state.send_modify(|state| {
                    state.errors = errors.clone();
                    state.failure = None;
                });
                return Err(SubmitError::Invalid(errors));
            }
        };

        let result = async {
            let id = self.fresh_id().await?;
            let application = Application {
                id: id.clone(),
                name: draft.name,
                email: draft.email,
                phone: draft.phone,
                course,
                message: draft.message,
            };
            self.store.create(STUDENTS, &id, &application).await?;
            Ok::<RecordId, SubmitError>(id)
        }
        .await;

        match result {
            Ok(id) => {
                info!("application {id} submitted");
                self.state.send_modify(|state| {
                    *state = FormState {
                        submitted: true,
                        ..FormState::default()
                    };
                });
                self.start_banner_timer();
                Ok(id)
            }
            Err(submit_error) => {
                error!("submitting application failed: {submit_error}");
                self.state.send_modify(|state| {
                    state.errors = FieldErrors::default();
                    state.failure = Some(SUBMIT_FAILURE.to_owned());
                });
                Err(submit_error)
            }
        }
    }

    fn start_banner_timer(&self) {
        let state = Arc::clone(&self.state);
        let banner = self.banner;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(banner).await;
            state.send_modify(|state| state.submitted = false);
        });
        let previous = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(timer);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for ApplicationForm {
    fn drop(&mut self) {
        let timer = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}
