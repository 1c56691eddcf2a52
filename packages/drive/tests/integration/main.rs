mod metadata;
mod service;
mod support;
