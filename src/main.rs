mod app;
mod config;
mod dispatch;
mod gemini;
mod history;
mod prompting;
mod realtime;
mod session;
mod store;
#[cfg(test)]
mod testing;
mod transport;
mod types;

#[tokio::main]
async fn main() {
    app::run().await;
}
