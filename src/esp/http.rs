//! HTTPS backup sink

use embedded_svc::http::client::Client;
use embedded_svc::io::Write;
use esp_idf_svc::http::client::{Configuration as HttpConfiguration, EspHttpConnection};
use log::debug;

use crate::backup::BackupSink;
use crate::error::{Error, Result};

pub struct HttpBackupSink {
    url: String,
}

impl HttpBackupSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl BackupSink for HttpBackupSink {
    fn post(&mut self, body: &[u8]) -> Result<()> {
        let connection = EspHttpConnection::new(&HttpConfiguration {
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        })
        .map_err(|e| Error::transport("backup connect", e))?;
        let mut client = Client::wrap(connection);

        let content_length = body.len().to_string();
        let headers = [
            ("content-type", "application/json"),
            ("content-length", content_length.as_str()),
        ];

        let mut request = client
            .post(&self.url, &headers)
            .map_err(|e| Error::transport("backup post", e))?;
        request
            .write_all(body)
            .map_err(|e| Error::transport("backup post", e))?;
        request
            .flush()
            .map_err(|e| Error::transport("backup post", e))?;
        let response = request
            .submit()
            .map_err(|e| Error::transport("backup post", e))?;

        // Script endpoints answer with a redirect to their output page.
        let status = response.status();
        debug!("Backup endpoint answered {}", status);
        if (200..400).contains(&status) {
            Ok(())
        } else {
            Err(Error::transport("backup post", format!("HTTP {status}")))
        }
    }
}
