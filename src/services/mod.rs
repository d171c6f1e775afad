pub mod api_client;
pub mod playback;
pub mod renderer;
pub mod session;
pub mod tts;

#[cfg(not(target_arch = "wasm32"))]
pub mod generation;
#[cfg(not(target_arch = "wasm32"))]
pub mod llm;
#[cfg(not(target_arch = "wasm32"))]
pub mod speech;
