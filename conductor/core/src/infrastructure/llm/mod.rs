// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Adapters
//
// Concrete implementations of the domain LLMProvider interface.
// Each adapter is an Anti-Corruption Layer for one vendor API.

pub mod anthropic;
pub mod ollama;

pub use anthropic::AnthropicAdapter;
pub use ollama::OllamaAdapter;
