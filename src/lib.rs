/// A control plane that provisions and maintains RKE2 Kubernetes clusters
/// on a Kamatera-style public cloud: declarative config in, a hierarchy of
/// durable background tasks out.
pub mod bootstrap;
pub mod cloudapi;
pub mod config;
pub mod engine;
pub mod error;
pub mod settings;
pub mod ssh;
pub mod tasks;
pub mod web;
