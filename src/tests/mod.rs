mod support;

mod channel_test;
mod connector_test;
