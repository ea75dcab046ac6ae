//! services/client/src/bin/quiz.rs
//!
//! Terminal front end for the quiz client. It wires the adapters to the
//! session and quiz controllers and drives them from a line-based prompt.

use async_trait::async_trait;
use quiz_client_lib::{
    adapters::{
        ApiClient, CredentialPrompt, Credentials, FilePreferenceStore, FirebaseIdentityAdapter,
        HttpBackend,
    },
    app::{QuizFlow, QuizPhase, SessionController, SessionPhase, SessionState},
    config::Config,
    error::ClientError,
};
use quiz_core::domain::RegistrationData;
use quiz_core::ports::{IdentityProvider, QuizBackend};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Input = Arc<Mutex<Lines<BufReader<Stdin>>>>;

const HELP: &str = "\
Commands:
  login                                   sign in and check your profile
  logout                                  sign out
  register <name> <YYYY-MM-DD> [a,b,c]    create your profile (up to 3 interests)
  profile                                 reload and show your profile
  interests                               list selectable interests
  topics                                  list quiz topics
  quiz <topic>                            generate and take a quiz
  remember on|off                         keep the session across restarts
  status                                  show the session state
  clear                                   dismiss the current error
  quit";

//=========================================================================================
// Terminal Credential Prompt
//=========================================================================================

/// Reads credentials from the terminal. An empty email dismisses the prompt.
struct TerminalPrompt {
    input: Input,
}

#[async_trait]
impl CredentialPrompt for TerminalPrompt {
    async fn request_credentials(&self) -> Option<Credentials> {
        let email = ask(&self.input, "email: ").await?;
        if email.is_empty() {
            return None;
        }
        let password = ask(&self.input, "password: ").await?;
        Some(Credentials { email, password })
    }
}

async fn ask(input: &Input, prompt: &str) -> Option<String> {
    print!("{}", prompt);
    std::io::stdout().flush().ok()?;
    let line = input.lock().await.next_line().await.ok()??;
    Some(line.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    info!("Configuration loaded. API at {}", config.api_base_url);

    // --- 2. Initialize Adapters ---
    let input: Input = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));
    let identity: Arc<dyn IdentityProvider> = Arc::new(FirebaseIdentityAdapter::new(
        config.identity.clone(),
        &config.data_dir,
        Arc::new(TerminalPrompt {
            input: input.clone(),
        }),
        config.request_timeout,
    )?);
    let api = ApiClient::new(&config.api_base_url, config.request_timeout, identity.clone())?;
    let backend: Arc<dyn QuizBackend> = Arc::new(HttpBackend::new(api));
    let preferences = Arc::new(FilePreferenceStore::new(&config.data_dir));

    // --- 3. Start the Session Controller ---
    let session = SessionController::new(identity, backend.clone(), preferences);
    let mut states = session.subscribe();
    if session.state().phase == SessionPhase::AuthCheckInProgress {
        println!("Restoring your previous session...");
        states
            .wait_for(|s| !s.loading.any() && s.phase != SessionPhase::AuthCheckInProgress)
            .await
            .map_err(|e| ClientError::Internal(e.to_string()))?;
    }
    print_state(&session.state());
    println!("{}", HELP);

    // --- 4. Command Loop ---
    loop {
        let Some(line) = ask(&input, "> ").await else {
            break;
        };
        let mut words = line.splitn(2, ' ');
        let command = words.next().unwrap_or_default();
        let rest = words.next().unwrap_or_default().trim();

        let outcome = match command {
            "" => Ok(()),
            "help" => {
                println!("{}", HELP);
                Ok(())
            }
            "quit" | "exit" => break,
            "login" => session.login().await.map_err(ClientError::from),
            "logout" => {
                session.logout().await;
                Ok(())
            }
            "register" => register(&session, rest).await,
            "profile" => session
                .reload_profile()
                .await
                .map(|p| println!("{:#?}", p))
                .map_err(ClientError::from),
            "interests" => backend
                .list_interests()
                .await
                .map(|list| println!("{}", list.join(", ")))
                .map_err(ClientError::from),
            "topics" => backend
                .list_topics()
                .await
                .map(|topics| {
                    for topic in topics {
                        println!("- {}", topic.title);
                    }
                })
                .map_err(ClientError::from),
            "quiz" => take_quiz(&session, &backend, &input, rest, config.num_questions).await,
            "remember" => session
                .set_remember_me(rest == "on")
                .map_err(ClientError::from),
            "clear" => {
                session.set_error(None);
                Ok(())
            }
            "status" => Ok(()),
            other => {
                println!("Unknown command '{}'. Type 'help'.", other);
                continue;
            }
        };

        if let Err(e) = outcome {
            println!("{}", e);
        }
        print_state(&session.state());
    }

    info!("Goodbye");
    Ok(())
}

async fn register(session: &SessionController, args: &str) -> Result<(), ClientError> {
    let mut parts = args.split_whitespace();
    let (Some(name), Some(birthdate)) = (parts.next(), parts.next()) else {
        println!("usage: register <name> <YYYY-MM-DD> [interest,interest]");
        return Ok(());
    };
    let interests = parts
        .next()
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let profile = session
        .complete_registration(RegistrationData {
            name: name.to_string(),
            birthdate: birthdate.to_string(),
            interests,
        })
        .await?;
    println!("Welcome, {}!", profile.name);
    Ok(())
}

async fn take_quiz(
    session: &SessionController,
    backend: &Arc<dyn QuizBackend>,
    input: &Input,
    topic: &str,
    num_questions: u32,
) -> Result<(), ClientError> {
    if session.state().phase != SessionPhase::Authenticated {
        println!("Log in and finish registration first.");
        return Ok(());
    }
    if topic.is_empty() {
        println!("usage: quiz <topic>");
        return Ok(());
    }

    println!("Generating a quiz on '{}'...", topic);
    let mut flow = QuizFlow::load(backend.clone(), topic, num_questions).await;
    if let QuizPhase::Failed(message) = flow.phase() {
        println!("{}", message);
        return Ok(());
    }
    let attempt = flow.start().await?;
    println!(
        "Attempt {} started. Answer with an option number, 'p'/'n' to move, 'submit' at the end.",
        attempt.attempt_id
    );

    while flow.phase() == &QuizPhase::InProgress {
        let index = flow.current_index();
        let Some(question) = flow.current_question().cloned() else {
            break;
        };
        println!(
            "\nQuestion {}/{}: {}",
            index + 1,
            flow.questions().len(),
            question.prompt
        );
        for (i, option) in question.options.iter().enumerate() {
            println!("  {}. {}", i + 1, option);
        }
        if let Some(answer) = flow.answer(index) {
            println!("  (answered: {})", answer);
        }

        let Some(reply) = ask(input, "answer> ").await else {
            break;
        };
        match reply.as_str() {
            "p" => {
                flow.previous();
            }
            "n" => {
                if !flow.next() {
                    println!("This is the last question. Type 'submit' when ready.");
                }
            }
            "submit" if flow.can_submit() => {
                let result = flow.complete().await?;
                println!("\nYou scored {}", result.summary());
            }
            "submit" => println!("Answer this question before submitting."),
            choice => {
                let picked = choice
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| question.options.get(n));
                match picked {
                    Some(option) if flow.submit_answer(option.clone())? => {
                        flow.next();
                    }
                    Some(_) => println!("You already answered this question."),
                    None => println!("Pick a number between 1 and {}.", question.options.len()),
                }
            }
        }
    }

    if flow.phase() == &QuizPhase::Completed {
        for (i, question) in flow.questions().iter().enumerate() {
            let verdict = match flow.feedback(i) {
                Some(feedback) if feedback.is_correct => "correct",
                Some(_) => "wrong",
                None => "not graded",
            };
            println!(
                "{}. {} | yours: {} | correct: {} ({})",
                i + 1,
                question.prompt,
                flow.answer(i).unwrap_or("no answer"),
                question.correct_answer,
                verdict
            );
        }
    } else if let QuizPhase::Failed(message) = flow.phase() {
        println!("{}", message);
    }
    Ok(())
}

fn print_state(state: &SessionState) {
    let who = state
        .profile
        .as_ref()
        .map(|p| p.name.clone())
        .or_else(|| state.identity.as_ref().and_then(|i| i.email.clone()))
        .unwrap_or_else(|| "nobody".to_string());
    println!("[{}] signed in as {}", state.phase, who);
    if let Some(error) = &state.error {
        println!("! {}", error);
    }
}
