//! Cross-module, end-to-end `.vtc` scenarios, run through the library's
//! own `runner::run_file` the way the `vtc` binary would. Each per-module
//! `#[cfg(test)]` suite covers one wire primitive in isolation; these
//! scenarios cover whole scripts driving real client/server fixtures over
//! real sockets.

use std::io::Write;
use std::time::Duration;

use vtc::runner::{run_file, Outcome};

async fn run(src: &str) -> vtc::runner::Verdict {
    let mut file = tempfile::Builder::new().suffix(".vtc").tempfile().unwrap();
    file.write_all(src.as_bytes()).unwrap();
    run_file(file.path(), false, Duration::from_secs(10), false).await
}

#[tokio::test]
async fn get_200_round_trip() {
    let verdict = run(
        r#"
vtest "GET / 200 round trip"

server s1 -listen 127.0.0.1:0 {
    rxreq
    expect req.method == GET
    expect req.url == /hello
    txresp -status 200 -reason OK -body "it worked"
}

client c1 -connect ${s1_addr}:${s1_port} -run {
    txreq -method GET -url /hello
    rxresp
    expect resp.status == 200
    expect resp.body == "it worked"
}
"#,
    )
    .await;
    assert_eq!(verdict.outcome, Outcome::Pass, "{:?}", verdict.message);
}

#[tokio::test]
async fn chunked_request_round_trip() {
    let verdict = run(
        r#"
vtest "chunked request body"

server s1 -listen 127.0.0.1:0 {
    rxreq
    expect req.http.Transfer-Encoding == chunked
    expect req.body == "hello chunked world"
    txresp -status 200
}

client c1 -connect ${s1_addr}:${s1_port} -run {
    txreq -method POST -url /upload -chunked -body "hello chunked world"
    rxresp
    expect resp.status == 200
}
"#,
    )
    .await;
    assert_eq!(verdict.outcome, Outcome::Pass, "{:?}", verdict.message);
}

#[tokio::test]
async fn gzip_round_trip_with_manual_gunzip() {
    let verdict = run(
        r#"
vtest "gzip response, manually decompressed"

server s1 -listen 127.0.0.1:0 {
    rxreq
    txresp -status 200 -gzipbody "plain text payload"
}

client c1 -connect ${s1_addr}:${s1_port} -run {
    txreq -method GET -url /gz
    rxresp
    expect resp.http.Content-Encoding == gzip
    gunzip
    expect resp.body == "plain text payload"
}
"#,
    )
    .await;
    assert_eq!(verdict.outcome, Outcome::Pass, "{:?}", verdict.message);
}

#[tokio::test]
async fn cyclic_barrier_releases_three_concurrent_participants() {
    let verdict = run(
        r#"
vtest "three concurrent fixtures release one barrier"

barrier b1 cond 3

server s0 -listen 127.0.0.1:0 -dispatch {
    delay 0s
}

client c1 -connect ${s0_addr}:${s0_port} -start {
    barrier b1 sync
}
client c2 -connect ${s0_addr}:${s0_port} -start {
    barrier b1 sync
}
client c3 -connect ${s0_addr}:${s0_port} -run {
    barrier b1 sync
}
"#,
    )
    .await;
    assert_eq!(verdict.outcome, Outcome::Pass, "{:?}", verdict.message);
}

#[tokio::test]
async fn http2_preface_settings_and_get() {
    let verdict = run(
        r#"
vtest "HTTP/2 preface, settings, and a GET"

server s1 -listen 127.0.0.1:0 {
    rxpri
    txsettings
    rxsettings
    stream 1 {
        rxreq
        expect req.method == GET
        txresp -status 200 -body "h2 ok"
    }
}

client c1 -connect ${s1_addr}:${s1_port} -run {
    txpri
    txsettings
    rxsettings
    stream 1 {
        txreq -method GET -url /h2
        rxresp
        expect resp.status == 200
        expect resp.body == "h2 ok"
    }
}
"#,
    )
    .await;
    assert_eq!(verdict.outcome, Outcome::Pass, "{:?}", verdict.message);
}

#[tokio::test]
async fn explicit_hpack_literal_directives_round_trip() {
    let verdict = run(
        r#"
vtest "explicit litHdr/litIdxHdr directives decode on the peer"

server s1 -listen 127.0.0.1:0 {
    rxpri
    txsettings
    rxsettings
    stream 1 {
        rxreq
        expect req.http.x-custom == hello
        expect req.http.accept-encoding == custom-value
        txresp -status 200
    }
}

client c1 -connect ${s1_addr}:${s1_port} -run {
    txpri
    txsettings
    rxsettings
    stream 1 {
        txreq -method GET -url /h2 -litHdr inc plain x-custom plain hello -litIdxHdr inc 16 plain custom-value
        rxresp
        expect resp.status == 200
    }
}
"#,
    )
    .await;
    assert_eq!(verdict.outcome, Outcome::Pass, "{:?}", verdict.message);
}

#[tokio::test]
async fn nostrend_keeps_the_send_half_open_until_explicit_data() {
    let verdict = run(
        r#"
vtest "-nostrend suppresses END_STREAM until an explicit txdata"

server s1 -listen 127.0.0.1:0 {
    rxpri
    txsettings
    rxsettings
    stream 1 {
        rxreq
        expect req.body == "deferred body"
        txresp -status 200
    }
}

client c1 -connect ${s1_addr}:${s1_port} -run {
    txpri
    txsettings
    rxsettings
    stream 1 {
        txreq -method POST -url /h2 -nostrend
        txdata -body "deferred body" -end
        rxresp
        expect resp.status == 200
    }
}
"#,
    )
    .await;
    assert_eq!(verdict.outcome, Outcome::Pass, "{:?}", verdict.message);
}

#[tokio::test]
async fn malformed_settings_frame_via_sendhex_is_rejected() {
    let verdict = run(
        r#"
vtest "malformed SETTINGS frame length is rejected"

server s1 -listen 127.0.0.1:0 {
    rxpri
    sendhex "00 00 07 04 00 00 00 00 00 00 01 00 00 10 00 00"
}

client c1 -connect ${s1_addr}:${s1_port} -run {
    txpri
    rxsettings
}
"#,
    )
    .await;
    assert_eq!(verdict.outcome, Outcome::Fail, "{:?}", verdict.message);
    let msg = verdict.message.unwrap_or_default();
    assert!(msg.contains("multiple of 6"), "{:?}", msg);
}
