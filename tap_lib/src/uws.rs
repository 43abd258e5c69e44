//! Readers for the UWS documents an async TAP endpoint answers with.
//!
//! Only the elements the job driver needs are picked out; everything else
//! (quotes, destruction times, result links, ...) is skipped.

use std::mem;

use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use tap_data::{JobDescription, JobInfo, JobParameters, Phase};

use crate::error::{Result, TapError};

/// parses a `<uws:job>` document
pub fn parse_job(xml: &str) -> Result<JobInfo> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut job_id = None;
    let mut run_id = None;
    let mut phase = None;
    let mut parameter_id: Option<String> = None;
    let mut parameters = Vec::new();
    let mut in_error_summary = false;
    let mut error_summary = None;

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                text.clear();
                match element.local_name().as_ref() {
                    b"parameter" => parameter_id = Some(attribute(&element, "id")?),
                    b"errorSummary" => in_error_summary = true,
                    _ => {}
                }
            }
            Event::Empty(element) => {
                if element.local_name().as_ref() == b"parameter" {
                    parameters.push((attribute(&element, "id")?, String::new()));
                }
            }
            Event::Text(content) => text.push_str(&content.unescape()?),
            Event::CData(content) => text.push_str(&String::from_utf8_lossy(&content.into_inner())),
            Event::End(element) => match element.local_name().as_ref() {
                b"jobId" => job_id = non_empty(mem::take(&mut text)),
                b"runId" => run_id = non_empty(mem::take(&mut text)),
                b"phase" => phase = Some(text.parse::<Phase>()?),
                b"parameter" => {
                    if let Some(id) = parameter_id.take() {
                        parameters.push((id, mem::take(&mut text)));
                    }
                }
                b"message" if in_error_summary => error_summary = non_empty(mem::take(&mut text)),
                b"errorSummary" => in_error_summary = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(JobInfo {
        job_id: job_id.ok_or_else(|| TapError::Malformed("job without jobId".to_string()))?,
        run_id,
        phase: phase.ok_or_else(|| TapError::Malformed("job without phase".to_string()))?,
        parameters: JobParameters::from_pairs(parameters)?,
        error_summary,
    })
}

#[derive(Default)]
struct PartialRef {
    job_id: String,
    run_id: Option<String>,
    phase: Option<Phase>,
    creation_time: Option<String>,
}

/// parses a `<uws:jobs>` listing into job descriptions, in document order
pub fn parse_job_list(xml: &str) -> Result<Vec<JobDescription>> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut current: Option<PartialRef> = None;
    let mut descriptions = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                text.clear();
                if element.local_name().as_ref() == b"jobref" {
                    current = Some(PartialRef {
                        job_id: attribute(&element, "id")?,
                        ..Default::default()
                    });
                }
            }
            Event::Text(content) => text.push_str(&content.unescape()?),
            Event::End(element) => {
                let name = element.local_name();
                let Some(jobref) = current.as_mut() else {
                    continue;
                };
                match name.as_ref() {
                    b"phase" => jobref.phase = Some(text.parse::<Phase>()?),
                    b"runId" => jobref.run_id = non_empty(mem::take(&mut text)),
                    b"creationTime" => jobref.creation_time = non_empty(mem::take(&mut text)),
                    b"jobref" => {
                        if let Some(jobref) = current.take() {
                            descriptions.push(finish_ref(jobref)?);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(descriptions)
}

fn finish_ref(jobref: PartialRef) -> Result<JobDescription> {
    let phase = jobref.phase.ok_or_else(|| {
        TapError::Malformed(format!("jobref {} without phase", jobref.job_id))
    })?;
    Ok(JobDescription {
        job_id: jobref.job_id,
        run_id: jobref.run_id,
        phase,
        creation_time: jobref.creation_time,
    })
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<String> {
    let found = element
        .try_get_attribute(name)
        .map_err(quick_xml::Error::from)?;
    match found {
        Some(attribute) => Ok(attribute.unescape_value()?.into_owned()),
        None => Err(TapError::Malformed(format!(
            "<{}> without `{}` attribute",
            String::from_utf8_lossy(element.local_name().as_ref()),
            name
        ))),
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod test {
    use tap_data::{Language, Phase};

    use super::{parse_job, parse_job_list};
    use crate::error::TapError;

    const JOB: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0" xmlns:xlink="http://www.w3.org/1999/xlink">
  <uws:jobId>b1f0a7e2</uws:jobId>
  <uws:runId>radial_prof_massive_bdmv</uws:runId>
  <uws:ownerId xsi:nil="true"/>
  <uws:phase>ARCHIVED</uws:phase>
  <uws:creationTime>2021-11-03T10:12:44Z</uws:creationTime>
  <uws:parameters>
    <uws:parameter id="query"><![CDATA[
-- Radial profile of most massive BDMV (z=0)
SELECT * FROM bolshoi.bdmvprof WHERE snapnum &lt; 416
]]></uws:parameter>
    <uws:parameter id="query_language">postgresql</uws:parameter>
    <uws:parameter id="queue">1h</uws:parameter>
    <uws:parameter id="upload"/>
  </uws:parameters>
  <uws:results/>
</uws:job>"#;

    const FAILED_JOB: &str = r#"<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0">
  <uws:jobId>77</uws:jobId>
  <uws:runId/>
  <uws:phase>ERROR</uws:phase>
  <uws:parameters>
    <uws:parameter id="query">SELECT x FROM missing &amp; gone</uws:parameter>
    <uws:parameter id="query_language">adql-2.0</uws:parameter>
  </uws:parameters>
  <uws:errorSummary type="fatal" hasDetail="false">
    <uws:message>relation "missing" does not exist</uws:message>
  </uws:errorSummary>
</uws:job>"#;

    const JOBS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<uws:jobs xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0" xmlns:xlink="http://www.w3.org/1999/xlink">
  <uws:jobref id="a1" xlink:href="https://www.cosmosim.org/tap/async/a1">
    <uws:phase>COMPLETED</uws:phase>
    <uws:runId>select_snapshot_by_redshifts</uws:runId>
    <uws:creationTime>2021-11-03T10:12:44Z</uws:creationTime>
  </uws:jobref>
  <uws:jobref id="a2" xlink:href="https://www.cosmosim.org/tap/async/a2">
    <uws:phase>EXECUTING</uws:phase>
  </uws:jobref>
</uws:jobs>"#;

    #[test]
    fn test_parse_archived_job() {
        let info = parse_job(JOB).unwrap();
        assert_eq!("b1f0a7e2", info.job_id);
        assert_eq!(Some("radial_prof_massive_bdmv".to_string()), info.run_id);
        assert_eq!(Phase::Archived, info.phase);
        assert_eq!(
            "\n-- Radial profile of most massive BDMV (z=0)\nSELECT * FROM bolshoi.bdmvprof WHERE snapnum &lt; 416\n",
            info.query().unwrap()
        );
        assert_eq!(Ok(Language::PostgreSql), info.language());
        assert_eq!(Some(""), info.parameters.get("upload"));
        assert_eq!(None, info.error_summary);
    }

    #[test]
    fn test_parse_failed_job() {
        let info = parse_job(FAILED_JOB).unwrap();
        assert_eq!(None, info.run_id);
        assert_eq!(Phase::Error, info.phase);
        assert_eq!("SELECT x FROM missing & gone", info.query().unwrap());
        assert_eq!(Ok(Language::Adql), info.language());
        assert_eq!(
            Some("relation \"missing\" does not exist".to_string()),
            info.error_summary
        );
    }

    #[test]
    fn test_parse_job_without_phase() {
        let xml = r#"<uws:job xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0"><uws:jobId>1</uws:jobId></uws:job>"#;
        match parse_job(xml) {
            Err(TapError::Malformed(_)) => {}
            other => panic!("expected malformed document, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_job_list() {
        let jobs = parse_job_list(JOBS).unwrap();
        assert_eq!(2, jobs.len());
        assert_eq!("a1", jobs[0].job_id);
        assert_eq!(Phase::Completed, jobs[0].phase);
        assert_eq!(
            Some("select_snapshot_by_redshifts".to_string()),
            jobs[0].run_id
        );
        assert_eq!(Some("2021-11-03T10:12:44Z".to_string()), jobs[0].creation_time);
        assert_eq!("a2", jobs[1].job_id);
        assert_eq!(Phase::Executing, jobs[1].phase);
        assert_eq!(None, jobs[1].run_id);
    }

    #[test]
    fn test_parse_empty_job_list() {
        let xml = r#"<uws:jobs xmlns:uws="http://www.ivoa.net/xml/UWS/v1.0"/>"#;
        assert!(parse_job_list(xml).unwrap().is_empty());
    }
}
