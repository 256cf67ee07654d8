//! Text recognition with bounding boxes using the macOS Vision framework.
//!
//! Vision reports each observation's `boundingBox` normalized to the image
//! with a bottom-left origin; observations are converted to pixel boxes with
//! a top-left origin before they leave this module.

use anyhow::{anyhow, Result};
use cocoa::base::{id, nil};
use cocoa::foundation::NSRect;
use image::RgbaImage;
use objc::{class, msg_send, sel, sel_impl};
use std::ffi::c_void;
use tracing::{debug, error};

use crate::desktop::TextObservation;
use crate::geometry::Bounds;

type CGImageRef = *mut c_void;
type CGColorSpaceRef = *mut c_void;
type CGDataProviderRef = *mut c_void;

const K_CG_RENDERING_INTENT_DEFAULT: u32 = 0;
const K_CG_IMAGE_ALPHA_LAST: u32 = 3;
const K_CG_BITMAP_BYTE_ORDER_DEFAULT: u32 = 0;

/// VNRequestTextRecognitionLevelAccurate
const RECOGNITION_LEVEL_ACCURATE: i64 = 0;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGColorSpaceCreateDeviceRGB() -> CGColorSpaceRef;
    fn CGColorSpaceRelease(space: CGColorSpaceRef);
    fn CGDataProviderCreateWithData(
        info: *mut c_void,
        data: *const c_void,
        size: usize,
        releaseData: *const c_void,
    ) -> CGDataProviderRef;
    fn CGDataProviderRelease(provider: CGDataProviderRef);
    fn CGImageCreate(
        width: usize,
        height: usize,
        bitsPerComponent: usize,
        bitsPerPixel: usize,
        bytesPerRow: usize,
        space: CGColorSpaceRef,
        bitmapInfo: u32,
        provider: CGDataProviderRef,
        decode: *const f64,
        shouldInterpolate: bool,
        intent: u32,
    ) -> CGImageRef;
    fn CGImageRelease(image: CGImageRef);
}

#[link(name = "Vision", kind = "framework")]
extern "C" {}

pub fn recognize(image: &RgbaImage) -> Result<Vec<TextObservation>> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("Image dimensions cannot be zero"));
    }

    debug!(width, height, "Starting OCR text recognition");
    unsafe { recognize_rgba(width, height, image.as_raw()) }
}

unsafe fn recognize_rgba(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<TextObservation>> {
    let color_space = CGColorSpaceCreateDeviceRGB();
    if color_space.is_null() {
        return Err(anyhow!("Failed to create CGColorSpace"));
    }

    // The provider borrows `rgba`; CGImage is released before this function returns.
    let data_provider = CGDataProviderCreateWithData(
        std::ptr::null_mut(),
        rgba.as_ptr() as *const c_void,
        rgba.len(),
        std::ptr::null(),
    );
    if data_provider.is_null() {
        CGColorSpaceRelease(color_space);
        return Err(anyhow!("Failed to create CGDataProvider"));
    }

    let cg_image = CGImageCreate(
        width as usize,
        height as usize,
        8,
        32,
        width as usize * 4,
        color_space,
        K_CG_BITMAP_BYTE_ORDER_DEFAULT | K_CG_IMAGE_ALPHA_LAST,
        data_provider,
        std::ptr::null(),
        false,
        K_CG_RENDERING_INTENT_DEFAULT,
    );
    CGDataProviderRelease(data_provider);
    CGColorSpaceRelease(color_space);

    if cg_image.is_null() {
        return Err(anyhow!("Failed to create CGImage from RGBA data"));
    }

    let result = perform_text_request(cg_image, width, height);
    CGImageRelease(cg_image);
    result
}

unsafe fn perform_text_request(
    cg_image: CGImageRef,
    width: u32,
    height: u32,
) -> Result<Vec<TextObservation>> {
    let handler_alloc: id = msg_send![class!(VNImageRequestHandler), alloc];
    let empty_dict: id = msg_send![class!(NSDictionary), dictionary];
    let request_handler: id = msg_send![
        handler_alloc,
        initWithCGImage: cg_image
        options: empty_dict
    ];
    if request_handler == nil {
        return Err(anyhow!("Failed to create VNImageRequestHandler"));
    }

    let request_alloc: id = msg_send![class!(VNRecognizeTextRequest), alloc];
    let text_request: id = msg_send![request_alloc, init];
    if text_request == nil {
        let _: () = msg_send![request_handler, release];
        return Err(anyhow!("Failed to create VNRecognizeTextRequest"));
    }

    let _: () = msg_send![text_request, setRecognitionLevel: RECOGNITION_LEVEL_ACCURATE];
    // Labels are proper names; language correction rewrites them.
    let _: () = msg_send![text_request, setUsesLanguageCorrection: false];

    let requests: id = msg_send![class!(NSArray), arrayWithObject: text_request];

    let mut error: id = nil;
    let success: bool = msg_send![
        request_handler,
        performRequests: requests
        error: &mut error
    ];

    if !success || error != nil {
        let error_desc = if error != nil {
            let desc: id = msg_send![error, localizedDescription];
            nsstring_to_string(desc)
        } else {
            "Unknown Vision framework error".to_string()
        };
        let _: () = msg_send![text_request, release];
        let _: () = msg_send![request_handler, release];
        error!(error = %error_desc, "Vision OCR request failed");
        return Err(anyhow!("Vision OCR failed: {}", error_desc));
    }

    let results: id = msg_send![text_request, results];
    let count: usize = if results == nil {
        0
    } else {
        msg_send![results, count]
    };

    let mut observations = Vec::with_capacity(count);
    for i in 0..count {
        let observation: id = msg_send![results, objectAtIndex: i];
        if observation == nil {
            continue;
        }

        let candidates: id = msg_send![observation, topCandidates: 1usize];
        if candidates == nil {
            continue;
        }
        let candidate_count: usize = msg_send![candidates, count];
        if candidate_count == 0 {
            continue;
        }
        let top_candidate: id = msg_send![candidates, objectAtIndex: 0usize];
        if top_candidate == nil {
            continue;
        }

        let text_str: id = msg_send![top_candidate, string];
        let text = nsstring_to_string(text_str);
        if text.trim().is_empty() {
            continue;
        }
        let confidence: f32 = msg_send![top_candidate, confidence];
        let normalized: NSRect = msg_send![observation, boundingBox];

        observations.push(TextObservation {
            text,
            bounds: denormalize(normalized, width, height),
            confidence,
        });
    }

    let _: () = msg_send![text_request, release];
    let _: () = msg_send![request_handler, release];

    debug!(observations = observations.len(), "OCR recognition completed");
    Ok(observations)
}

/// Normalized bottom-left rect to pixel top-left bounds.
fn denormalize(rect: NSRect, width: u32, height: u32) -> Bounds {
    let w = width as f64;
    let h = height as f64;
    let x = rect.origin.x * w;
    let y = (1.0 - rect.origin.y - rect.size.height) * h;
    Bounds::new(
        x.round() as i32,
        y.round() as i32,
        (rect.size.width * w).round().max(1.0) as u32,
        (rect.size.height * h).round().max(1.0) as u32,
    )
}

unsafe fn nsstring_to_string(ns_string: id) -> String {
    if ns_string == nil {
        return String::new();
    }
    let utf8_ptr: *const i8 = msg_send![ns_string, UTF8String];
    if utf8_ptr.is_null() {
        return String::new();
    }
    std::ffi::CStr::from_ptr(utf8_ptr)
        .to_string_lossy()
        .into_owned()
}
